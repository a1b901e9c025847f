// Content store idempotence
// Storing the same bytes or the same patch twice yields one address and one copy.

use patchwork::{
    content_address, ChangeController, ContentStore, LocalContentStore, Patch,
    PatchChangeController,
};
use proptest::prelude::*;
use tempfile::TempDir;

const DIFF: &str = "diff --git a/x.txt b/x.txt\n--- a/x.txt\n+++ b/x.txt\n@@ -1 +1 @@\n-foo\n+bar\n";

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_put_is_idempotent(content in prop::collection::vec(any::<u8>(), 0..512)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let dir = TempDir::new().unwrap();
            let store = LocalContentStore::open(dir.path()).await.unwrap();

            let first = store.put(&content).await.unwrap();
            let second = store.put(&content).await.unwrap();
            assert_eq!(&first, &second);
            assert_eq!(first, content_address(&content));
            assert_eq!(store.object_count().await.unwrap(), 1);
            assert_eq!(store.get(&first).await.unwrap(), content);
        });
    }
}

#[tokio::test]
async fn test_same_patch_stored_twice_is_one_object() {
    let dir = TempDir::new().unwrap();
    let controller = PatchChangeController::open(dir.path()).await.unwrap();

    let first = Patch::new(DIFF, "agent001", "task-1", vec![]).unwrap();
    // another agent producing identical content for the same task
    let second = Patch::new(DIFF, "agent002", "task-1", vec![]).unwrap();
    assert_eq!(first.patch_id(), second.patch_id());

    let first_id = controller.create_change(&first).await.unwrap();
    let second_id = controller.create_change(&second).await.unwrap();
    assert_eq!(first_id, second_id);

    let store = LocalContentStore::open(dir.path()).await.unwrap();
    assert_eq!(store.object_count().await.unwrap(), 1);
    assert!(store.is_pinned(&first_id).await.unwrap());
    assert_eq!(controller.get_patch_history("task-1").unwrap().len(), 1);
}

#[tokio::test]
async fn test_content_survives_reopening() {
    let dir = TempDir::new().unwrap();
    let address = {
        let store = LocalContentStore::open(dir.path()).await.unwrap();
        let address = store.put(b"durable bytes").await.unwrap();
        assert!(store.pin(&address).await.unwrap());
        address
    };

    let reopened = LocalContentStore::open(dir.path()).await.unwrap();
    assert!(reopened.contains(&address).await.unwrap());
    assert!(reopened.is_pinned(&address).await.unwrap());
    assert_eq!(reopened.get(&address).await.unwrap(), b"durable bytes".to_vec());
    assert!(!reopened.pin(&content_address(b"never stored")).await.unwrap());
}

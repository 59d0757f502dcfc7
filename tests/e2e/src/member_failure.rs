//! E2E Test: Member Failure
//!
//! Verifies that quorums follow the live membership:
//! - a stopped member drops out of every survivor's member count
//! - the survivors keep committing with the smaller quorum

use {shardline_consensus_election::Transaction, shardline_e2e_tests::helpers::*};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_survivors_commit_after_member_stops() {
    init_logging();
    let mut shard = LocalShard::start(3).await;
    shard.wait_for_members(3).await;

    shard.stop(2).await;
    shard.wait_for_members(2).await;
    assert_eq!(shard.nodes[0].peers(), vec![shard.addrs[1]]);
    assert_eq!(shard.nodes[1].peers(), vec![shard.addrs[0]]);

    shard.nodes[0]
        .submit_transaction("deposit", "carol:7")
        .await
        .unwrap();
    let first = shard.wait_for_blocks(0, 1).await;
    let second = shard.wait_for_blocks(1, 1).await;
    assert_same_chain(&[first.clone(), second]);
    assert_eq!(
        first[0].transactions,
        vec![Transaction::new("deposit", "carol:7")]
    );
    assert!(shard.nodes[2].committed_blocks().is_empty());

    shard.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_removed_connection_is_redialed() {
    init_logging();
    let shard = LocalShard::start(2).await;
    shard.wait_for_members(2).await;

    // The lower address dials, so dropping the link from either side makes
    // the lower member reconnect on its next retry tick.
    assert!(shard.nodes[1].remove_connection(shard.addrs[0]).await);
    assert!(!shard.nodes[1].remove_connection(shard.addrs[0]).await);
    shard.wait_for_members(2).await;

    shard.nodes[1]
        .submit_transaction("deposit", "dave:3")
        .await
        .unwrap();
    let first = shard.wait_for_blocks(0, 1).await;
    let second = shard.wait_for_blocks(1, 1).await;
    assert_same_chain(&[first, second]);

    shard.shutdown().await;
}

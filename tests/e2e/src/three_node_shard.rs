//! E2E Test: 3-Member Shard
//!
//! Verifies the full event lifecycle over real sockets:
//! - members connect exactly once per pair
//! - one member's deposit is committed by everyone
//! - concurrent proposals from every member end up in one agreed order

use {shardline_consensus_election::Transaction, shardline_e2e_tests::helpers::*};

// ─────────────────────────────────────────────────────────────────────────────
// Test: a single deposit reaches every chain
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_deposit_committed_everywhere() {
    init_logging();
    let shard = LocalShard::start(3).await;
    shard.wait_for_members(3).await;
    for (index, node) in shard.nodes.iter().enumerate() {
        let expected: Vec<_> = shard
            .addrs
            .iter()
            .copied()
            .filter(|addr| *addr != shard.addrs[index])
            .collect();
        assert_eq!(node.peers(), expected);
    }

    shard.nodes[0]
        .submit_transaction("deposit", "10")
        .await
        .unwrap();

    let chains = shard.wait_for_chains(1).await;
    assert_same_chain(&chains);
    let block = &chains[0][0];
    assert_eq!(block.origin, shard.addrs[0]);
    assert_eq!(
        block.transactions,
        vec![Transaction::new("deposit", "10")]
    );

    shard.shutdown().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: concurrent proposals are ordered identically
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_proposals_agree_on_order() {
    init_logging();
    let shard = LocalShard::start(3).await;
    shard.wait_for_members(3).await;

    for (index, node) in shard.nodes.iter().enumerate() {
        node.submit_transaction("deposit", format!("member{index}:10"))
            .await
            .unwrap();
    }

    let chains = shard.wait_for_chains(3).await;
    let chains: Vec<_> = chains
        .into_iter()
        .map(|chain| chain.into_iter().take(3).collect::<Vec<_>>())
        .collect();
    assert_same_chain(&chains);

    // Every deposit is committed exactly once.
    let mut committed: Vec<String> = chains[0]
        .iter()
        .flat_map(|block| block.transactions.iter().map(|trx| trx.data.clone()))
        .collect();
    committed.sort();
    assert_eq!(committed, vec!["member0:10", "member1:10", "member2:10"]);

    shard.shutdown().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: a stream of transactions from one member keeps its order
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sequential_deposits_keep_submission_order() {
    init_logging();
    let shard = LocalShard::start(3).await;
    shard.wait_for_members(3).await;

    for amount in 1..=5 {
        shard.nodes[1]
            .submit_transaction("deposit", format!("bob:{amount}"))
            .await
            .unwrap();
        shard.wait_for_blocks(1, amount).await;
    }

    let chains = shard.wait_for_chains(5).await;
    assert_same_chain(&chains);
    let data: Vec<String> = chains[0]
        .iter()
        .flat_map(|block| block.transactions.iter().map(|trx| trx.data.clone()))
        .collect();
    assert_eq!(data, vec!["bob:1", "bob:2", "bob:3", "bob:4", "bob:5"]);

    shard.shutdown().await;
}

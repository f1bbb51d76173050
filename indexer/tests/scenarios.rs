//! Scenario tests over the library's pure surface: transfer
//! extraction, deployment preparation, batch windows and fork-point
//! detection wired together the way the sync engine drives them.

use asi_common::chain::{BlockDetail, BlockSummary, DeployData, TransferStatus};
use asi_common::utils::format_token;
use asi_indexer::extractor::extract_transfers;
use asi_indexer::processor::{derive_genesis_data, prepare_deployment};
use asi_indexer::reorg::{check_window, find_fork_point};
use asi_indexer::store::models::StoredBlockRef;
use asi_indexer::sync::batch_window;

fn addr(tag: char) -> String {
    format!("1111{}", tag.to_string().repeat(50))
}

#[test]
fn direct_transfer_extraction_scenario() {
    // one canonical three-tuple transfer of 5 ASI
    let term = format!(r#"match ("{}", "{}", 500000000)"#, addr('a'), addr('b'));
    let transfers = extract_transfers(&term, "04deployer", false);

    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].amount_dust, 500_000_000);
    assert_eq!(format_token(transfers[0].amount_dust as u64), "5.00000000");
    assert_eq!(transfers[0].status, TransferStatus::Success);
    assert_eq!(transfers[0].from_address, addr('a'));
    assert_eq!(transfers[0].to_address, addr('b'));
}

#[test]
fn variable_bound_transfer_prefers_direct_pattern() {
    let term = format!(
        r#"match ("{src}", "{dst}", 100000000) {{ (fromV, toV, amt) =>
             @vault!("transfer", toV, 100000000, *ret)
           }}"#,
        src = addr('s'),
        dst = addr('d'),
    );

    // pattern 1 fires, pattern 2 is skipped: exactly one transfer
    let transfers = extract_transfers(&term, "04deployer", false);
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].from_address, addr('s'));
    assert_eq!(transfers[0].to_address, addr('d'));
}

#[test]
fn errored_deployment_scenario() {
    // block with a single errored deploy carrying a direct transfer
    let deploy = DeployData {
        sig: "s1".into(),
        deployer: "04deployer".into(),
        term: format!(r#"match ("{}", "{}", 42)"#, addr('a'), addr('b')),
        errored: true,
        ..Default::default()
    };
    let prepared = prepare_deployment(deploy, 1_700_000_000_000, true);

    assert!(prepared.errored);
    assert_eq!(prepared.transfers.len(), 1);
    assert_eq!(prepared.transfers[0].status, TransferStatus::Failed);
    assert_eq!(prepared.transfers[0].amount_dust, 42);
}

#[test]
fn genesis_bootstrap_preserves_sums() {
    let validator_a = format!("04{}", "1".repeat(128));
    let validator_b = format!("04{}", "2".repeat(128));
    let detail: BlockDetail = serde_json::from_value(serde_json::json!({
        "blockInfo": {
            "blockHash": "genesis",
            "blockNumber": 0,
            "bonds": [
                {"validator": validator_a, "stake": 100},
                {"validator": validator_b, "stake": 250},
            ],
        },
        "deploys": [
            {"sig": "d1", "term": format!("initVault!(\"{}\", 4000)", addr('w'))},
            {"sig": "d2", "term": format!("initVault!(\"{}\", 6000)", addr('x'))},
        ],
    }))
    .unwrap();

    let genesis = derive_genesis_data(&detail);
    let unbonded: i64 = genesis.allocations.iter().map(|(_, amount)| amount).sum();
    let bonded: i64 = genesis.bonds.iter().map(|(_, stake)| stake).sum();

    assert_eq!(unbonded, 10_000);
    assert_eq!(bonded, 350);
    assert_eq!(genesis.allocations.len(), 2);
    assert_eq!(genesis.bonds.len(), 2);
}

#[test]
fn empty_start_window_covers_genesis() {
    // store empty, head at 2: the first batch is [0, 2]
    assert_eq!(batch_window(0, 2, true, 0, 100), Some((0, 2)));
    // caught up afterwards
    assert_eq!(batch_window(2, 2, false, 0, 100), None);
}

#[test]
fn reorg_depth_three_scenario() {
    // stored 0..=20 with h0..h20; canonical replaces the last three
    let local: Vec<StoredBlockRef> = (0..=20)
        .map(|n| StoredBlockRef {
            block_number: n,
            block_hash: format!("h{}", n),
            parent_hash: format!("h{}", n - 1),
        })
        .collect();
    let canonical: Vec<BlockSummary> = (0..=20)
        .map(|n| BlockSummary {
            block_number: n,
            block_hash: Some(if n >= 18 {
                format!("h{}'", n)
            } else {
                format!("h{}", n)
            }),
            ..Default::default()
        })
        .collect();

    let fork_point = find_fork_point(&local, &canonical, 0, 20).unwrap();
    assert_eq!(fork_point, 18);

    let orphaned: Vec<&str> = local
        .iter()
        .filter(|block| block.block_number >= fork_point)
        .map(|block| block.block_hash.as_str())
        .collect();
    assert_eq!(orphaned, ["h18", "h19", "h20"]);
    assert_eq!(20 - fork_point + 1, 3);
    // after rollback the checkpoint rewinds to fork_point - 1
    assert_eq!(fork_point - 1, 17);
}

#[test]
fn reorg_window_boundaries() {
    // reorg exactly at head - confirmation_depth is inside the window
    let (from, to) = check_window(100, 0, 100, 10).unwrap();
    assert!(from <= 90 && to == 90);

    // a block below head - max_reorg_depth is outside the window
    let (from, _) = check_window(1000, 0, 100, 10).unwrap();
    assert!(from > 1000 - 100 - 1);
}

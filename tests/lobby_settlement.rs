// tests/lobby_settlement.rs

use std::sync::Arc;

use receipt_split::credential::Sha256Verifier;
use receipt_split::heuristics::rules::RuleTable;
use receipt_split::heuristics::totals::{ReviewReport, ReviewTolerances};
use receipt_split::heuristics::{CategorySource, ItemOrigin, LineItem, ReceiptTotals};
use receipt_split::heuristics::items::categorize;
use receipt_split::lobby_db::MemoryLobbyStore;
use receipt_split::{Interpretation, LedgerError, LobbyService, OcrLine, interpret_receipt};

const EPS: f64 = 1e-9;

fn item(id: &str, name: &str, quantity: f64, unit_price: f64) -> LineItem {
    LineItem {
        id: id.into(),
        name: name.into(),
        quantity,
        unit_price,
        cost: quantity * unit_price,
        category: categorize(name),
        category_source: CategorySource::Inferred,
        other_subcategory: None,
        origin: ItemOrigin::Receipt,
    }
}

fn accepted(items: Vec<LineItem>, totals: ReceiptTotals) -> Interpretation {
    Interpretation {
        items,
        totals,
        review: ReviewReport {
            needs_review: false,
            confidence: 0.8,
            reasons: Vec::new(),
        },
        line_count: 0,
    }
}

fn rice_and_juice() -> Interpretation {
    accepted(
        vec![item("itm_1", "Rice", 2.0, 100.0), item("itm_2", "Juice", 1.0, 50.0)],
        ReceiptTotals {
            detected_subtotal: Some(250.0),
            detected_tax_total: Some(25.0),
            detected_grand_total: Some(275.0),
            ..ReceiptTotals::default()
        },
    )
}

fn service() -> Arc<LobbyService> {
    Arc::new(LobbyService::new(
        Arc::new(MemoryLobbyStore::new()),
        Arc::new(Sha256Verifier::new("test-pepper")),
    ))
}

async fn lobby_with(
    svc: &LobbyService,
    interpretation: &Interpretation,
    names: &[&str],
) -> (String, Vec<String>) {
    let id = svc.create_lobby("Lunch", interpretation, "2468").await.unwrap();
    let mut pids = Vec::new();
    for name in names {
        pids.push(svc.join_lobby(&id, "2468", name).await.unwrap().participant_id);
    }
    (id, pids)
}

#[tokio::test]
async fn rice_and_juice_split() {
    let svc = service();
    let (id, pids) = lobby_with(&svc, &rice_and_juice(), &["A", "B"]).await;
    svc.set_claim(&id, &pids[0], "itm_1", 2.0).await.unwrap();
    svc.set_claim(&id, &pids[1], "itm_2", 1.0).await.unwrap();

    let s = svc.get_summary(&id).await.unwrap();
    let a = s.share(&pids[0]).unwrap();
    let b = s.share(&pids[1]).unwrap();

    assert!((s.item_subtotal - 250.0).abs() < EPS);
    assert!((s.extra_charges - 25.0).abs() < EPS);
    assert!((a.base_total - 200.0).abs() < EPS);
    assert!((b.base_total - 50.0).abs() < EPS);
    assert!((a.extra_share - 20.0).abs() < EPS);
    assert!((b.extra_share - 5.0).abs() < EPS);
    assert!((a.total - 220.0).abs() < EPS);
    assert!((b.total - 55.0).abs() < EPS);
    assert!((s.claimed_total - 275.0).abs() < EPS);
    assert!(s.unclaimed_total.abs() < EPS);
}

#[tokio::test]
async fn repeated_claim_is_idempotent() {
    let svc = service();
    let (id, pids) = lobby_with(&svc, &rice_and_juice(), &["A"]).await;

    svc.set_claim(&id, &pids[0], "itm_1", 1.0).await.unwrap();
    let once_lobby = svc.get_lobby(&id).await.unwrap();
    let once = svc.get_summary(&id).await.unwrap();

    svc.set_claim(&id, &pids[0], "itm_1", 1.0).await.unwrap();
    let twice_lobby = svc.get_lobby(&id).await.unwrap();
    let twice = svc.get_summary(&id).await.unwrap();

    assert_eq!(once_lobby, twice_lobby);
    assert_eq!(once, twice);
}

#[tokio::test]
async fn grand_total_reconciles_with_tax() {
    let svc = service();
    let (id, _) = lobby_with(&svc, &rice_and_juice(), &[]).await;
    let s = svc.get_summary(&id).await.unwrap();
    assert!((s.extra_charges - 25.0).abs() < EPS);
    assert!((s.grand_total - 275.0).abs() < EPS);
}

#[tokio::test]
async fn equal_claims_split_extras_equally() {
    let interpretation = accepted(
        vec![item("itm_1", "Dosa", 1.0, 90.0), item("itm_2", "Idli", 1.0, 90.0)],
        ReceiptTotals {
            detected_grand_total: Some(198.0),
            ..ReceiptTotals::default()
        },
    );
    let svc = service();
    let (id, pids) = lobby_with(&svc, &interpretation, &["A", "B", "C"]).await;
    svc.set_claim(&id, &pids[0], "itm_1", 1.0).await.unwrap();
    svc.set_claim(&id, &pids[1], "itm_2", 1.0).await.unwrap();

    let s = svc.get_summary(&id).await.unwrap();
    let a = s.share(&pids[0]).unwrap();
    let b = s.share(&pids[1]).unwrap();
    let c = s.share(&pids[2]).unwrap();
    assert!((a.extra_share - b.extra_share).abs() < EPS);
    assert!((a.extra_share - 9.0).abs() < EPS);
    assert_eq!(c.extra_share, 0.0);
    assert_eq!(c.total, 0.0);
}

#[tokio::test]
async fn claim_sequences_conserve_and_never_overclaim() {
    let interpretation = accepted(
        vec![
            item("itm_1", "Rice", 3.0, 100.0),
            item("itm_2", "Juice", 2.0, 45.0),
            item("itm_3", "Dal", 1.5, 80.0),
        ],
        ReceiptTotals {
            detected_tax_total: Some(31.5),
            ..ReceiptTotals::default()
        },
    );
    let svc = service();
    let (id, pids) = lobby_with(&svc, &interpretation, &["A", "B", "C"]).await;
    let items = ["itm_1", "itm_2", "itm_3"];

    // Deterministic pseudo-random walk over claims.
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    for _ in 0..200 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let pid = &pids[(seed >> 33) as usize % pids.len()];
        let item_id = items[(seed >> 40) as usize % items.len()];
        let quantity = match item_id {
            "itm_3" => ((seed >> 50) % 4) as f64 * 0.5,
            _ => ((seed >> 50) % 4) as f64,
        };

        let before = svc.get_lobby(&id).await.unwrap();
        match svc.set_claim(&id, pid, item_id, quantity).await {
            Ok(state) => assert!(state.claimed <= state.quantity + 1e-6),
            Err(LedgerError::OverClaim { .. }) => {
                assert_eq!(svc.get_lobby(&id).await.unwrap(), before);
            }
            Err(other) => panic!("unexpected error {other:?}"),
        }

        let lobby = svc.get_lobby(&id).await.unwrap();
        for item in &lobby.items {
            assert!(lobby.claimed_quantity(&item.id) <= item.quantity + 1e-6);
        }
        let s = lobby.summary();
        assert!((s.claimed_base_total + s.unclaimed_item_total - s.item_subtotal).abs() < 1e-6);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_on_one_item_are_linearized() {
    let interpretation = accepted(
        vec![item("itm_1", "Butter Naan", 3.0, 40.0)],
        ReceiptTotals::default(),
    );
    let svc = service();
    let names: Vec<String> = (0..10).map(|i| format!("P{i}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let (id, pids) = lobby_with(&svc, &interpretation, &refs).await;

    let mut handles = Vec::new();
    for pid in pids {
        let svc = svc.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            svc.set_claim(&id, &pid, "itm_1", 1.0).await
        }));
    }

    let mut accepted_claims = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted_claims += 1,
            Err(LedgerError::OverClaim { .. }) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(accepted_claims, 3);
    let lobby = svc.get_lobby(&id).await.unwrap();
    assert!((lobby.claimed_quantity("itm_1") - 3.0).abs() < EPS);
}

#[tokio::test]
async fn lowering_quantity_clamps_existing_claims() {
    let svc = service();
    let (id, pids) = lobby_with(&svc, &rice_and_juice(), &["Host", "Guest"]).await;
    svc.set_claim(&id, &pids[0], "itm_1", 1.0).await.unwrap();
    svc.set_claim(&id, &pids[1], "itm_1", 1.0).await.unwrap();

    let outcome = svc
        .edit_item(
            &id,
            &pids[0],
            "itm_1",
            receipt_split::ledger::ItemEdit {
                quantity: Some(1.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.adjustments.len(), 1);
    let lobby = svc.get_lobby(&id).await.unwrap();
    assert!((lobby.claimed_quantity("itm_1") - 1.0).abs() < EPS);
    let s = lobby.summary();
    assert!((s.claimed_base_total + s.unclaimed_item_total - s.item_subtotal).abs() < EPS);
}

#[tokio::test]
async fn discounted_receipt_settles_to_printed_total() {
    let receipt: Vec<OcrLine> = [
        "Veg Thali 5 100.00 500.00",
        "Sub Total 500.00",
        "Discount -50.00",
        "GST 5% 22.50",
        "Net Payable 472.50",
    ]
    .into_iter()
    .map(OcrLine::from)
    .collect();
    let interpretation =
        interpret_receipt(&receipt, &RuleTable::defaults(), &ReviewTolerances::default());
    assert!(!interpretation.needs_review(), "{:?}", interpretation.review.reasons);

    let svc = service();
    let (id, pids) = lobby_with(&svc, &interpretation, &["A"]).await;
    svc.set_claim(&id, &pids[0], "itm_1", 5.0).await.unwrap();

    let s = svc.get_summary(&id).await.unwrap();
    assert!((s.grand_total - 472.5).abs() < EPS);
    assert!((s.share(&pids[0]).unwrap().total - 472.5).abs() < EPS);
    assert!(s.unclaimed_total.abs() < EPS);
}

#[tokio::test]
async fn grand_total_far_below_items_is_not_used() {
    let interpretation = accepted(
        vec![item("itm_1", "Thali", 2.0, 100.0)],
        ReceiptTotals {
            detected_subtotal: Some(200.0),
            detected_grand_total: Some(120.0),
            detected_tax_total: Some(10.0),
            ..ReceiptTotals::default()
        },
    );
    let svc = service();
    let (id, pids) = lobby_with(&svc, &interpretation, &["A"]).await;
    svc.set_claim(&id, &pids[0], "itm_1", 2.0).await.unwrap();

    let s = svc.get_summary(&id).await.unwrap();
    assert!((s.extra_charges - 10.0).abs() < EPS);
    assert!((s.grand_total - 210.0).abs() < EPS);

    // A grand total equal to the items means no extra charges at all.
    let interpretation = accepted(
        vec![item("itm_1", "Thali", 2.0, 100.0)],
        ReceiptTotals {
            detected_grand_total: Some(200.0),
            ..ReceiptTotals::default()
        },
    );
    let (id, _) = lobby_with(&svc, &interpretation, &[]).await;
    let s = svc.get_summary(&id).await.unwrap();
    assert_eq!(s.extra_charges, 0.0);
    assert!((s.grand_total - 200.0).abs() < EPS);
}

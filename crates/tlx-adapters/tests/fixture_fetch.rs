use std::path::Path;

use chrono::NaiveDate;
use serde_json::Value;
use tlx_adapters::{fetch_family, FetchError, Selection};
use tlx_core::{DealFamily, Direction};
use tlx_storage::testkit::ScriptedLedger;

fn fixture(name: &str) -> Vec<Value> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    let text = std::fs::read_to_string(root.join("fixtures/ledger").join(format!("{name}.json")))
        .expect("fixture");
    serde_json::from_str(&text).expect("fixture json")
}

fn window() -> Selection {
    let trade_date = NaiveDate::from_ymd_opt(2024, 3, 14).expect("trade date");
    let since = NaiveDate::from_ymd_opt(1900, 1, 1)
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .expect("since");
    Selection::Window { trade_date, since }
}

#[tokio::test]
async fn misc_charge_fixture_rebuilds_headers() {
    let ledger = ScriptedLedger::new()
        .with_rows("misc_charge.headers", fixture("misc_charge.headers"))
        .with_rows("misc_charge.terms", fixture("misc_charge.terms"));

    let headers = fetch_family(&ledger, DealFamily::MiscCharge, &window())
        .await
        .expect("fetch");
    assert_eq!(headers.len(), 2);
    assert_eq!(headers[0].direction, Direction::Other("Payable".into()));
    assert_eq!(headers[1].direction, Direction::Other("Receivable".into()));
    let sequences: Vec<i32> = headers[0].terms.iter().map(|term| term.vol_seq).collect();
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(headers[1].terms[0].volume, 250.0);
    assert_eq!(
        ledger.issued_names().await,
        vec!["misc_charge.headers", "misc_charge.terms"]
    );
}

#[tokio::test]
async fn key_lookup_is_refused_before_any_query() {
    let ledger = ScriptedLedger::new();
    let err = fetch_family(&ledger, DealFamily::MiscCharge, &Selection::Keys(vec![5001]))
        .await
        .expect_err("unsupported");
    assert!(matches!(
        err,
        FetchError::UnsupportedSelection {
            family: DealFamily::MiscCharge,
            selection: "keys"
        }
    ));
    assert!(ledger.issued().await.is_empty());
}

//! Integration tests: drive `Scout` end to end over a scripted browser.

use std::time::Duration;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use pricescout::scout::{QueryState, Scout};
use pricescout::tabular::{self, Delim};
use pricescout::testing::{
    aria_card, container_card, results_page, test_config, MockGate, MockSession,
    TEST_CHALLENGE_URL,
};
use pricescout_common::{Config, EvaluationStatus, ExtractionStrategy, PriceCell, Query};

fn url(query: &str) -> String {
    test_config().search_url(query)
}

fn scout(config: Config, session: &MockSession, gate: &MockGate) -> (Scout, CancellationToken) {
    let cancel = CancellationToken::new();
    let scout = Scout::new(
        config,
        Box::new(session.clone()),
        Box::new(gate.clone()),
        cancel.clone(),
    );
    (scout, cancel)
}

fn whey_page() -> String {
    results_page(&[
        aria_card("Whey Protein 1kg Baunilha", "R$ 10,00", "/shopping/product/1"),
        aria_card("Whey Protein 900g Chocolate", "R$ 50,00", "/shopping/product/2"),
        aria_card("Whey Protein 1kg Chocolate", "R$ 10,50", "https://loja.example.com/w"),
        aria_card("Whey Protein 1kg Morango", "R$ 100,00", "/shopping/product/3"),
    ])
}

fn d(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

#[tokio::test]
async fn far_price_is_reduced_away_and_kept_in_ledger() {
    let q = "Whey Protein 1kg";
    let session = MockSession::new().on_page(&url(q), &whey_page());
    let gate = MockGate::resolving();
    let (scout, _cancel) = scout(test_config(), &session, &gate);

    let report = scout.run_batch(&[Query::new(q)]).await;

    assert!(!report.cancelled);
    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.summary.min_price, PriceCell::Amount(d(1000)));
    assert_eq!(outcome.summary.max_price, PriceCell::Amount(d(1050)));
    assert_eq!(outcome.trace.state, QueryState::Summarized);
    assert_eq!(outcome.trace.strategy, Some("aria-label"));

    let entries = outcome.ledger.entries();
    assert_eq!(entries.len(), 4, "every candidate gets an evaluation");
    assert_eq!(entries[0].status, EvaluationStatus::Included);
    assert_eq!(entries[1].status, EvaluationStatus::RejectedRelevance);
    assert!(entries[1]
        .rejection_reason
        .as_deref()
        .unwrap()
        .starts_with("quantity/unit mismatch"));
    assert_eq!(entries[2].status, EvaluationStatus::Included);
    assert_eq!(entries[3].status, EvaluationStatus::RejectedOutlier);
    assert!(entries[3]
        .rejection_reason
        .as_deref()
        .unwrap()
        .starts_with("price 100.00 outside band"));

    assert_eq!(
        entries[0].candidate.link.as_deref(),
        Some("https://shop.test/shopping/product/1")
    );
    assert_eq!(
        entries[2].candidate.link.as_deref(),
        Some("https://loja.example.com/w")
    );

    assert_eq!(report.stats.queries_priced, 1);
    assert_eq!(report.stats.rejected_outlier, 1);
    assert_eq!(report.stats.rejected_relevance, 1);
    assert_eq!(session.close_count(), 1);
}

#[tokio::test]
async fn empty_results_page_is_not_found() {
    let q = "Produto Inexistente";
    let session = MockSession::new().on_page(&url(q), &results_page(&[]));
    let gate = MockGate::resolving();
    let (scout, _cancel) = scout(test_config(), &session, &gate);

    let report = scout.run_batch(&[Query::new(q)]).await;
    let outcome = &report.outcomes[0];

    assert_eq!(outcome.summary.min_price, PriceCell::NotFound);
    assert_eq!(outcome.summary.max_price, PriceCell::NotFound);
    assert!(outcome.ledger.is_empty());
    assert_eq!(report.stats.queries_not_found, 1);
}

#[tokio::test]
async fn all_rejected_is_not_found_but_ledger_survives() {
    let q = "Whey Protein 1kg";
    let page = results_page(&[
        aria_card("Whey Protein 2kg", "R$ 150,00", "/p/1"),
        aria_card("Whey Protein 900g", "R$ 80,00", "/p/2"),
    ]);
    let session = MockSession::new().on_page(&url(q), &page);
    let gate = MockGate::resolving();
    let (scout, _cancel) = scout(test_config(), &session, &gate);

    let report = scout.run_batch(&[Query::new(q)]).await;
    let outcome = &report.outcomes[0];

    assert_eq!(outcome.summary.min_price, PriceCell::NotFound);
    assert_eq!(outcome.ledger.len(), 2);
    assert_eq!(outcome.ledger.count(EvaluationStatus::RejectedRelevance), 2);
}

#[tokio::test]
async fn per_query_failures_become_sentinels_and_batch_continues() {
    let queries = [
        Query::new("Creatina 300g"),
        Query::new("Mel 500g"),
        Query::new("Café 500g"),
        Query::new("Whey Protein 1kg"),
    ];
    let session = MockSession::new()
        .on_timeout(&url("Creatina 300g"))
        .on_failure(&url("Mel 500g"), "net::ERR_CONNECTION_RESET")
        .on_panic(&url("Café 500g"))
        .on_page(&url("Whey Protein 1kg"), &whey_page());
    let gate = MockGate::resolving();
    let (scout, _cancel) = scout(test_config(), &session, &gate);

    let report = scout.run_batch(&queries).await;

    let mins: Vec<PriceCell> = report.summaries().map(|s| s.min_price).collect();
    assert_eq!(
        mins,
        vec![
            PriceCell::Timeout,
            PriceCell::UnexpectedError,
            PriceCell::UnexpectedError,
            PriceCell::Amount(d(1000)),
        ]
    );
    assert_eq!(report.stats.queries_timed_out, 1);
    assert_eq!(report.stats.queries_failed, 2);
    assert_eq!(session.renders().len(), 4);
    assert_eq!(session.close_count(), 1);
}

#[tokio::test]
async fn hung_render_times_out() {
    let q = "Whey Protein 1kg";
    let session = MockSession::new().on_hang(&url(q));
    let gate = MockGate::resolving();
    let config = Config {
        page_timeout: Duration::from_millis(50),
        ..test_config()
    };
    let (scout, _cancel) = scout(config, &session, &gate);

    let report = scout.run_batch(&[Query::new(q)]).await;
    assert_eq!(report.outcomes[0].summary.min_price, PriceCell::Timeout);
    assert_eq!(report.outcomes[0].trace.state, QueryState::Idle);
}

#[tokio::test]
async fn challenge_pauses_then_reloads_same_query() {
    let q = "Whey Protein 1kg";
    let session = MockSession::new()
        .on_challenge(&url(q))
        .on_page(&url(q), &whey_page());
    let gate = MockGate::resolving();
    let (scout, _cancel) = scout(test_config(), &session, &gate);

    let report = scout.run_batch(&[Query::new(q)]).await;
    let outcome = &report.outcomes[0];

    assert_eq!(gate.waits(), vec![TEST_CHALLENGE_URL.to_string()]);
    assert_eq!(session.renders(), vec![url(q), url(q)]);
    assert_eq!(outcome.trace.challenges, 1);
    assert_eq!(outcome.summary.min_price, PriceCell::Amount(d(1000)));
    assert_eq!(report.stats.challenges_resolved, 1);
}

fn aria_only_config() -> Config {
    Config {
        extraction_strategy: ExtractionStrategy::AriaLabel,
        ..test_config()
    }
}

#[tokio::test]
async fn challenge_is_detected_in_aria_only_mode() {
    let q = "Whey Protein 1kg";
    let session = MockSession::new()
        .on_challenge(&url(q))
        .on_page(&url(q), &whey_page());
    let gate = MockGate::resolving();
    let (scout, _cancel) = scout(aria_only_config(), &session, &gate);

    let report = scout.run_batch(&[Query::new(q)]).await;
    let outcome = &report.outcomes[0];

    assert_eq!(gate.waits(), vec![TEST_CHALLENGE_URL.to_string()]);
    assert_eq!(outcome.trace.challenges, 1);
    assert_eq!(outcome.trace.strategy, Some("aria-label"));
    assert_eq!(outcome.summary.min_price, PriceCell::Amount(d(1000)));
}

#[tokio::test]
async fn aria_only_mode_without_price_elements_times_out() {
    let q = "Creatina 300g";
    let page = results_page(&[container_card("Creatina 300g", "R$ 89,90", "/p/1")]);
    let session = MockSession::new().on_page(&url(q), &page);
    let gate = MockGate::resolving();
    let (scout, _cancel) = scout(aria_only_config(), &session, &gate);

    let report = scout.run_batch(&[Query::new(q)]).await;
    let outcome = &report.outcomes[0];

    assert!(gate.waits().is_empty());
    assert_eq!(outcome.summary.min_price, PriceCell::Timeout);
    assert_eq!(outcome.trace.state, QueryState::PageLoaded);
}

#[tokio::test]
async fn unresolvable_challenge_is_unexpected_error() {
    let q = "Whey Protein 1kg";
    let session = MockSession::new().on_challenge(&url(q));
    let gate = MockGate::failing();
    let (scout, _cancel) = scout(test_config(), &session, &gate);

    let report = scout.run_batch(&[Query::new(q)]).await;
    assert_eq!(report.outcomes[0].summary.min_price, PriceCell::UnexpectedError);
    assert_eq!(report.outcomes[0].trace.state, QueryState::CaptchaPause);
}

#[tokio::test]
async fn cancel_during_challenge_pause_stops_batch_and_closes_session() {
    let q = "Whey Protein 1kg";
    let session = MockSession::new().on_challenge(&url(q));
    let gate = MockGate::hanging();
    let (scout, cancel) = scout(test_config(), &session, &gate);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let report = scout
        .run_batch(&[Query::new(q), Query::new("Creatina 300g")])
        .await;

    assert!(report.cancelled);
    assert!(report.outcomes.is_empty());
    assert_eq!(gate.waits().len(), 1);
    assert_eq!(session.renders().len(), 1);
    assert_eq!(session.close_count(), 1);
}

#[tokio::test]
async fn cancel_during_delay_keeps_finished_queries() {
    let q = "Whey Protein 1kg";
    let session = MockSession::new().on_page(&url(q), &whey_page());
    let gate = MockGate::resolving();
    let config = Config {
        query_delay: Duration::from_secs(30),
        ..test_config()
    };
    let (scout, cancel) = scout(config, &session, &gate);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let report = scout
        .run_batch(&[Query::new(q), Query::new("Creatina 300g")])
        .await;

    assert!(report.cancelled);
    assert_eq!(report.outcomes.len(), 1);
    assert!(report.outcomes[0].summary.is_found());
    assert_eq!(session.close_count(), 1);
}

#[tokio::test]
async fn cancelled_before_start_renders_nothing() {
    let session = MockSession::new();
    let gate = MockGate::resolving();
    let (scout, cancel) = scout(test_config(), &session, &gate);
    cancel.cancel();

    let report = scout.run_batch(&[Query::new("Whey Protein 1kg")]).await;

    assert!(report.cancelled);
    assert!(session.renders().is_empty());
    assert_eq!(session.close_count(), 1);
}

#[tokio::test]
async fn auto_strategy_falls_back_to_titled_containers() {
    let q = "Creatina 300g";
    let page = results_page(&[
        container_card("Creatina Monohidratada 300g", "R$ 89,90", "/url?q=a"),
        container_card("Creatina Pura 300g", "R$ 99,90", "/url?q=b"),
    ]);
    let session = MockSession::new().on_page(&url(q), &page);
    let gate = MockGate::resolving();
    let (scout, _cancel) = scout(test_config(), &session, &gate);

    let report = scout.run_batch(&[Query::new(q)]).await;
    let outcome = &report.outcomes[0];

    assert_eq!(outcome.trace.strategy, Some("titled-container"));
    assert_eq!(outcome.summary.min_price, PriceCell::Amount(d(8990)));
    assert_eq!(outcome.summary.max_price, PriceCell::Amount(d(9990)));
    assert_eq!(report.stats.strategy_fallbacks, 1);
}

#[tokio::test]
async fn summary_and_ledger_files_are_written() {
    let queries = [Query::new("Whey Protein 1kg"), Query::new("Mel 500g")];
    let session = MockSession::new()
        .on_page(&url("Whey Protein 1kg"), &whey_page())
        .on_timeout(&url("Mel 500g"));
    let gate = MockGate::resolving();
    let (scout, _cancel) = scout(test_config(), &session, &gate);
    let report = scout.run_batch(&queries).await;

    let dir = tempfile::tempdir().unwrap();
    let summary_path = dir.path().join("precos_encontrados.csv");
    let ledger_path = dir.path().join("itens_procurados.csv");
    tabular::write_summary(&summary_path, &report.outcomes, Delim::Csv).unwrap();
    tabular::write_ledger(&ledger_path, &report.outcomes, Delim::Csv).unwrap();

    let summary = std::fs::read_to_string(&summary_path).unwrap();
    assert_eq!(
        summary,
        "query,min_price,max_price\nWhey Protein 1kg,10.00,10.50\nMel 500g,timeout,timeout\n"
    );

    let ledger = std::fs::read_to_string(&ledger_path).unwrap();
    let lines: Vec<&str> = ledger.lines().collect();
    assert_eq!(
        lines[0],
        "query,candidate_name,price,similarity,link,status,rejection_reason"
    );
    assert_eq!(lines.len(), 5, "header plus one row per evaluation");
    assert!(lines[1].starts_with("Whey Protein 1kg,Whey Protein 1kg Baunilha,10.00,"));
    assert!(lines[1].contains(",https://shop.test/shopping/product/1,included,"));
    assert!(lines[4].contains(",rejected (outlier),\"price 100.00 outside band ["));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["stats"]["queries_total"], 2);
    assert_eq!(json["outcomes"][0]["trace"]["state"], "summarized");
    assert_eq!(json["outcomes"][1]["summary"]["min_price"]["kind"], "timeout");
}

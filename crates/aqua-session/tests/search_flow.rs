mod common;

use std::time::Duration;

use aqua_core::{Skill, WorkerId};
use aqua_session::{NoticeLevel, SearchOutcome, WorkerSearch, SEARCH_ERROR_MESSAGE, SEARCH_ERROR_TITLE};
use common::{worker, ScriptedDirectory};
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn nothing_is_fetched_until_search_is_triggered() {
    let screen = WorkerSearch::new(ScriptedDirectory::new());

    screen.edit_filters(|f| f.set_city("Austin"));

    assert_eq!(screen.directory().search_calls(), 0);
    assert!(screen.results().is_empty());
    assert!(!screen.is_searching());
}

#[tokio::test]
async fn successful_search_replaces_results() {
    let directory = ScriptedDirectory::new()
        .reply("", vec![worker("w1", "Ana"), worker("w2", "Ben")])
        .reply("skills=plumbing", vec![worker("w3", "Cy")]);
    let screen = WorkerSearch::new(directory);

    let first = screen.search().await;
    assert_eq!(first, SearchOutcome::Succeeded { generation: 1, count: 2 });

    screen.edit_filters(|f| f.set_skill(Some(Skill::Plumbing)));
    screen.search().await;

    let names: Vec<_> = screen.results().into_iter().map(|w| w.name).collect();
    assert_eq!(names, vec!["Cy"]);
    assert_eq!(screen.directory().queries(), vec!["", "skills=plumbing"]);
    assert!(screen.take_notices().is_empty());
}

#[tokio::test]
async fn failed_search_keeps_previous_results_and_raises_notice() {
    let directory = ScriptedDirectory::new()
        .reply("", vec![worker("w1", "Ana")])
        .fail("city=Dallas", 503);
    let screen = WorkerSearch::new(directory);
    screen.search().await;

    screen.edit_filters(|f| f.set_city("Dallas"));
    let outcome = screen.search().await;

    assert!(matches!(outcome, SearchOutcome::Failed { generation: 2, .. }));
    assert!(!screen.is_searching());
    assert_eq!(screen.results()[0].id, WorkerId::from("w1"));

    let notices = screen.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert_eq!(notices[0].title, SEARCH_ERROR_TITLE);
    assert_eq!(notices[0].description, SEARCH_ERROR_MESSAGE);
    assert!(screen.take_notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn late_response_from_superseded_search_is_ignored() {
    let directory = ScriptedDirectory::new()
        .reply_after("city=Austin", Duration::from_millis(100), vec![worker("a1", "Austin")])
        .reply_after("city=Dallas", Duration::from_millis(10), vec![worker("d1", "Dallas")]);
    let screen = WorkerSearch::new(directory);
    screen.edit_filters(|f| f.set_city("Austin"));

    let (old, new) = tokio::join!(screen.search(), async {
        sleep(Duration::from_millis(1)).await;
        screen.edit_filters(|f| f.set_city("Dallas"));
        screen.search().await
    });

    assert_eq!(old, SearchOutcome::Superseded { generation: 1, latest: 2 });
    assert_eq!(new, SearchOutcome::Succeeded { generation: 2, count: 1 });
    assert_eq!(screen.results()[0].name, "Dallas");
    assert!(!screen.is_searching());
}

#[tokio::test(start_paused = true)]
async fn early_response_from_superseded_search_is_ignored() {
    let directory = ScriptedDirectory::new()
        .fail_after("city=Austin", Duration::from_millis(10), 500)
        .reply_after("city=Dallas", Duration::from_millis(100), vec![worker("d1", "Dallas")]);
    let screen = WorkerSearch::new(directory);
    screen.edit_filters(|f| f.set_city("Austin"));

    let (old, new) = tokio::join!(screen.search(), async {
        sleep(Duration::from_millis(1)).await;
        screen.edit_filters(|f| f.set_city("Dallas"));
        screen.search().await
    });

    assert!(matches!(old, SearchOutcome::Superseded { generation: 1, .. }));
    assert!(matches!(new, SearchOutcome::Succeeded { generation: 2, .. }));
    assert_eq!(screen.results()[0].name, "Dallas");
    // the superseded failure must not surface
    assert!(screen.take_notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn identical_trigger_while_in_flight_is_coalesced() {
    let directory = ScriptedDirectory::new().reply_after(
        "skills=plumbing",
        Duration::from_millis(50),
        vec![worker("w1", "Ana")],
    );
    let screen = WorkerSearch::new(directory);
    screen.edit_filters(|f| f.set_skill(Some(Skill::Plumbing)));

    let (first, second) = tokio::join!(screen.search(), screen.search());

    assert_eq!(first, SearchOutcome::Succeeded { generation: 1, count: 1 });
    assert_eq!(second, SearchOutcome::Coalesced { generation: 1 });
    assert_eq!(screen.directory().search_calls(), 1);

    screen.search().await;
    assert_eq!(screen.directory().search_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn dropped_search_does_not_block_an_identical_retry() {
    let directory = ScriptedDirectory::new().reply_after(
        "city=Austin",
        Duration::from_millis(100),
        vec![worker("a1", "Austin")],
    );
    let screen = WorkerSearch::new(directory);
    screen.edit_filters(|f| f.set_city("Austin"));

    let dropped = timeout(Duration::from_millis(10), screen.search()).await;
    assert!(dropped.is_err());
    assert!(!screen.is_searching());

    sleep(Duration::from_secs(5)).await;
    let retry = screen.search().await;

    assert_eq!(retry, SearchOutcome::Succeeded { generation: 2, count: 1 });
    assert_eq!(screen.directory().search_calls(), 2);
    assert_eq!(screen.results()[0].name, "Austin");
}

#[tokio::test]
async fn selection_follows_the_refreshed_results() {
    let directory = ScriptedDirectory::new()
        .reply("", vec![worker("w1", "Ana"), worker("w2", "Ben")])
        .reply("city=Austin", vec![worker("w2", "Ben")])
        .reply("city=Dallas", vec![worker("w3", "Cy")]);
    let screen = WorkerSearch::new(directory);
    screen.search().await;

    screen.select_worker(&WorkerId::from("w2")).unwrap();
    screen.edit_filters(|f| f.set_city("Austin"));
    screen.search().await;
    assert_eq!(screen.selected().map(|w| w.name), Some("Ben".to_string()));
    assert!(screen.draft().is_some());

    screen.edit_filters(|f| f.set_city("Dallas"));
    screen.search().await;
    assert!(screen.selected().is_none());
    assert!(screen.draft().is_none());
}

#[tokio::test]
async fn failed_search_keeps_the_selection() {
    let directory = ScriptedDirectory::new()
        .reply("", vec![worker("w1", "Ana")])
        .fail("city=Dallas", 502);
    let screen = WorkerSearch::new(directory);
    screen.search().await;
    screen.select_worker(&WorkerId::from("w1")).unwrap();

    screen.edit_filters(|f| f.set_city("Dallas"));
    screen.search().await;

    assert_eq!(screen.selected().map(|w| w.id), Some(WorkerId::from("w1")));
}

#[tokio::test]
async fn cleared_filters_search_without_parameters() {
    let screen = WorkerSearch::new(ScriptedDirectory::new());
    screen
        .edit_filters(|f| {
            f.set_city("Austin");
            f.set_price_range(20, 60)
        })
        .unwrap();
    screen.search().await;

    screen.clear_filters();
    assert!(screen.criteria().is_default());
    screen.search().await;

    assert_eq!(
        screen.directory().queries(),
        vec!["city=Austin&minPrice=20&maxPrice=60", ""]
    );
}

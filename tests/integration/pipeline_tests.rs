//! End-to-end runs of the coordinator over scripted sites

use crate::common::{
    assert_conserved, settings, shared, targets, CountingReporter, FailingSink, MemorySink, Reply,
    ScriptedFetcher,
};
use serde_json::json;
use std::time::Duration;
use sumi_tide::config::{CrawlModel, RepeatWhile};
use sumi_tide::crawler::{Coordinator, Phase, RepeatLimit};
use sumi_tide::dedup::Deduplicator;
use sumi_tide::extract::{EmissionRule, FieldSpec, HtmlExtractor, Schema};
use sumi_tide::output::PhaseReport;
use sumi_tide::work::RangeGenerator;
use sumi_tide::{PhaseState, Sink, WorkItem};

const SITE: &str = "https://site.test";

fn url(path: &str) -> String {
    format!("{}{}", SITE, path)
}

fn seeds(paths: &[&str]) -> Vec<WorkItem> {
    paths.iter().map(|p| WorkItem::new(url(p))).collect()
}

fn page(title: &str, links: &str) -> String {
    format!("<html><body><h1>{}</h1>{}</body></html>", title, links)
}

fn later() -> EmissionRule {
    EmissionRule {
        active: false,
        ..Default::default()
    }
}

/// One record per page: its title, plus `a.next` links followed in the
/// same phase and `a.later` links parked for the next one
fn page_schema() -> Schema {
    Schema::new("page")
        .field(FieldSpec::new("title").selector("h1"))
        .field(
            FieldSpec::new("next")
                .selector("a.next")
                .attr("href")
                .multiple()
                .emit(EmissionRule::default()),
        )
        .field(
            FieldSpec::new("later")
                .selector("a.later")
                .attr("href")
                .multiple()
                .emit(later()),
        )
}

#[tokio::test]
async fn test_two_phase_crawl() {
    let (fetcher, script) = shared(
        ScriptedFetcher::new()
            .page(
                &url("/a"),
                &page("A", r#"<a class="next" href="/c">c</a><a class="later" href="/d">d</a>"#),
            )
            .reply(&url("/b"), Reply::Status(500))
            .page(&url("/c"), &page("C", ""))
            .page(&url("/d"), &page("D", "")),
    );

    let model = CrawlModel::new("site")
        .with_settings(settings(2))
        .phase(Phase::new("list").seeds(seeds(&["/a", "/b"])).schema(page_schema()))
        .phase(Phase::new("detail").schema(page_schema()));

    let (sink, batches) = MemorySink::new("memory");
    let report = Coordinator::new(model, fetcher, HtmlExtractor::new(), vec![sink])
        .run()
        .await
        .unwrap();

    assert_eq!(report.phases.len(), 2);
    let list = &report.phases[0];
    assert_eq!(list.state, PhaseState::Complete);
    assert_eq!(list.fed, 3);
    assert_eq!(list.parsed, 2);
    assert_eq!(list.dropped, 1);
    assert_eq!(list.forwarded, 1);
    assert_eq!(list.records, 2);

    let detail = &report.phases[1];
    assert_eq!(detail.state, PhaseState::Complete);
    assert_eq!(detail.fed, 1);
    assert_eq!(detail.parsed, 1);

    assert_eq!(script.completed().last().map(String::as_str), Some(url("/d").as_str()));
    assert_eq!(targets(&batches), vec![url("/a"), url("/c"), url("/d")]);
    assert_eq!(report.total_records(), 3);
    assert!(!report.aborted());
}

#[tokio::test]
async fn test_every_target_fetched_once() {
    let (fetcher, script) = shared(
        ScriptedFetcher::new()
            .page(
                &url("/a"),
                &page(
                    "A",
                    r#"<a class="next" href="/c">1</a><a class="next" href="/c">2</a>
                       <a class="next" href="/a">self</a><a class="next" href="/c#top">3</a>"#,
                ),
            )
            .page(
                &url("/c"),
                &page("C", r#"<a class="next" href="/a">back</a><a class="later" href="/a">x</a>"#),
            ),
    );

    let model = CrawlModel::new("loops")
        .with_settings(settings(3))
        .phase(Phase::new("walk").seeds(seeds(&["/a", "/a"])).schema(page_schema()));

    let report = Coordinator::new(model, fetcher, HtmlExtractor::new(), Vec::new())
        .with_dedup(Deduplicator::exact())
        .run()
        .await
        .unwrap();

    assert_eq!(script.calls_for(&url("/a")), 1);
    assert_eq!(script.calls_for(&url("/c")), 1);
    assert_eq!(script.calls().len(), 2);

    let walk = &report.phases[0];
    assert_eq!(walk.fed, 2);
    assert_eq!(walk.forwarded, 0);
    assert_conserved(walk);
}

#[tokio::test]
async fn test_default_dedup_skips_generated_repeats() {
    // Page n links on to n+1 and parks a detail link shared by ten pages
    let mut script = ScriptedFetcher::new();
    for n in 0..50 {
        let links = format!(
            r#"<a class="next" href="/item/{}">next</a><a class="later" href="/detail/{}">d</a>"#,
            (n + 1) % 50,
            n % 5
        );
        script = script.page(&url(&format!("/item/{}", n)), &page(&n.to_string(), &links));
    }
    let (fetcher, script) = shared(script);

    let repeats = (0..200).map(|n| WorkItem::new(url(&format!("/item/{}", n % 50))));
    let model = CrawlModel::new("repeats")
        .with_settings(settings(4))
        .phase(
            Phase::new("walk")
                .generator(Box::new(repeats))
                .generator(Box::new(RangeGenerator::new(url("/item/{}"), 10, 30, 1)))
                .schema(page_schema()),
        );

    let report = Coordinator::new(model, fetcher, HtmlExtractor::new(), Vec::new())
        .run()
        .await
        .unwrap();

    for n in 0..50 {
        assert_eq!(script.calls_for(&url(&format!("/item/{}", n))), 1, "/item/{}", n);
    }
    assert_eq!(script.calls().len(), 50);

    let walk = &report.phases[0];
    assert_eq!(walk.fed, 50);
    assert_eq!(walk.parsed, 50);
    assert_eq!(walk.forwarded, 5);
    assert_conserved(walk);
}

#[tokio::test]
async fn test_counters_balance_under_failures() {
    // Page n links to 2n and 2n+1; every third page fails
    let mut script = ScriptedFetcher::new();
    for n in 1..40u32 {
        let target = url(&format!("/p/{}", n));
        script = if n % 3 == 0 {
            script.reply(&target, Reply::Status(503))
        } else {
            let links = format!(
                r#"<a class="next" href="/p/{}">l</a><a class="next" href="/p/{}">r</a>"#,
                2 * n,
                2 * n + 1
            );
            script.page(&target, &page(&n.to_string(), &links))
        };
    }
    let (fetcher, script) = shared(script);

    let model = CrawlModel::new("tree")
        .with_settings(settings(4))
        .phase(Phase::new("tree").seeds(seeds(&["/p/1"])).schema(page_schema()));

    let report = Coordinator::new(model, fetcher, HtmlExtractor::new(), Vec::new())
        .with_dedup(Deduplicator::exact())
        .run()
        .await
        .unwrap();

    let tree = &report.phases[0];
    assert_eq!(tree.state, PhaseState::Complete);
    assert_conserved(tree);
    assert_eq!(tree.fed, script.calls().len());
    assert_eq!(tree.parsed, script.completed().len());
    assert!(tree.dropped > 0);
}

#[tokio::test]
async fn test_shutdown_joins_workers_and_sinks() {
    let (fetcher, _script) = shared(
        ScriptedFetcher::new()
            .page(&url("/a"), &page("A", r#"<a class="later" href="/b">b</a>"#))
            .page(&url("/b"), &page("B", "")),
    );
    let model = CrawlModel::new("failing")
        .with_settings(settings(3))
        .phase(Phase::new("one").seeds(seeds(&["/a"])).schema(page_schema()))
        .phase(Phase::new("two").workers(2).schema(page_schema()));

    let (memory, batches) = MemorySink::new("memory");
    let failing: Box<dyn Sink> = Box::new(FailingSink);
    let coordinator = Coordinator::new(model, fetcher, HtmlExtractor::new(), vec![failing, memory]);
    let workers = coordinator.live_workers();
    let consumers = coordinator.live_sink_consumers();

    let report = coordinator.run().await.unwrap();

    assert_eq!(workers.count(), 0);
    assert_eq!(consumers.count(), 0);
    assert_eq!(report.phases.len(), 2);

    let failing = report.sinks.iter().find(|s| s.name == "failing").unwrap();
    assert_eq!(failing.batches, 0);
    assert_eq!(failing.failed_batches, 2);

    // A failing sink does not starve the others
    let memory = report.sinks.iter().find(|s| s.name == "memory").unwrap();
    assert_eq!(memory.batches, 2);
    assert_eq!(batches.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_timeouts_retried_until_budget_spent() {
    let (fetcher, script) = shared(
        ScriptedFetcher::new()
            .reply(&url("/slow"), Reply::Timeout)
            .page(&url("/ok"), &page("ok", "")),
    );
    let model = CrawlModel::new("retry")
        .with_settings(settings(2))
        .phase(Phase::new("retry").seeds(seeds(&["/slow", "/ok"])).schema(page_schema()));

    let report = Coordinator::new(model, fetcher, HtmlExtractor::new(), Vec::new())
        .run()
        .await
        .unwrap();

    // One attempt plus two retries
    assert_eq!(script.calls_for(&url("/slow")), 3);
    let phase = &report.phases[0];
    assert_eq!(phase.state, PhaseState::Complete);
    assert_eq!(phase.requeued, 2);
    assert_eq!(phase.fed, 2);
    assert_eq!(phase.parsed, 1);
    assert_eq!(phase.dropped, 1);
}

#[tokio::test]
async fn test_request_timeout_bounds_a_hanging_fetch() {
    let (fetcher, script) = shared(ScriptedFetcher::new().reply(&url("/hang"), Reply::Hang));
    let mut settings = settings(1);
    settings.request_timeout = Duration::from_millis(30);
    settings.max_retries = 1;

    let model = CrawlModel::new("hang")
        .with_settings(settings)
        .phase(Phase::new("hang").seeds(seeds(&["/hang"])));

    let report = Coordinator::new(model, fetcher, HtmlExtractor::new(), Vec::new())
        .run()
        .await
        .unwrap();

    assert_eq!(script.calls_for(&url("/hang")), 2);
    assert_eq!(report.phases[0].dropped, 1);
    assert_conserved(&report.phases[0]);
}

#[tokio::test]
async fn test_connection_errors_depend_on_host() {
    let (fetcher, script) = shared(
        ScriptedFetcher::new()
            .reply(&url("/gone"), Reply::Refused { reachable: false })
            .reply(&url("/flaky"), Reply::Refused { reachable: true }),
    );
    let model = CrawlModel::new("refused")
        .with_settings(settings(2))
        .phase(Phase::new("refused").seeds(seeds(&["/gone", "/flaky"])));

    let report = Coordinator::new(model, fetcher, HtmlExtractor::new(), Vec::new())
        .run()
        .await
        .unwrap();

    assert_eq!(script.calls_for(&url("/gone")), 1);
    assert_eq!(script.calls_for(&url("/flaky")), 3);
    let phase = &report.phases[0];
    assert_eq!(phase.dropped, 2);
    assert_eq!(phase.requeued, 2);
    assert_conserved(phase);
}

/// Pages `/list/1..=3`, each linking to the next one as later work
fn paginated() -> ScriptedFetcher {
    ScriptedFetcher::new()
        .page(&url("/list/1"), &page("1", r#"<a class="later" href="/list/2">next</a>"#))
        .page(&url("/list/2"), &page("2", r#"<a class="later" href="/list/3">next</a>"#))
        .page(&url("/list/3"), &page("3", ""))
}

#[tokio::test]
async fn test_repeat_follows_pagination() {
    let (fetcher, script) = shared(paginated());
    let reporter = CountingReporter::default();

    let model = CrawlModel::new("pages").with_settings(settings(2)).phase(
        Phase::new("pages")
            .seeds(seeds(&["/list/1"]))
            .schema(page_schema())
            .repeat_with(RepeatLimit::new(None, RepeatWhile::Forwarded)),
    );

    let report = Coordinator::new(model, fetcher, HtmlExtractor::new(), Vec::new())
        .with_reporter(reporter.clone())
        .run()
        .await
        .unwrap();

    let iterations: Vec<usize> = report.phase(0).map(|r| r.iteration).collect();
    assert_eq!(iterations, vec![0, 1, 2]);
    assert_eq!(report.total_parsed(), 3);
    assert_eq!(
        script.completed(),
        vec![url("/list/1"), url("/list/2"), url("/list/3")]
    );
    assert_eq!(*reporter.started.lock().unwrap(), vec![(0, 0), (0, 1), (0, 2)]);
    for iteration in report.phase(0) {
        assert_eq!(iteration.fed, 1);
        assert_conserved(iteration);
    }
}

#[tokio::test]
async fn test_repeat_limit_hands_leftovers_on() {
    let (fetcher, script) = shared(paginated());

    let model = CrawlModel::new("pages")
        .with_settings(settings(2))
        .phase(
            Phase::new("pages")
                .seeds(seeds(&["/list/1"]))
                .schema(page_schema())
                .repeat_with(RepeatLimit::new(Some(2), RepeatWhile::Forwarded)),
        )
        .phase(Phase::new("tail").schema(page_schema()));

    let report = Coordinator::new(model, fetcher, HtmlExtractor::new(), Vec::new())
        .run()
        .await
        .unwrap();

    assert_eq!(report.phase(0).count(), 2);
    let tail: Vec<&PhaseReport> = report.phase(1).collect();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].fed, 1);
    assert_eq!(script.completed().last().map(String::as_str), Some(url("/list/3").as_str()));
}

#[tokio::test]
async fn test_repeat_with_closure() {
    let (fetcher, _script) = shared(paginated());

    let model = CrawlModel::new("pages").with_settings(settings(1)).phase(
        Phase::new("pages")
            .seeds(seeds(&["/list/1"]))
            .schema(page_schema())
            .repeat_with(|report: &PhaseReport| report.iteration == 0),
    );

    let report = Coordinator::new(model, fetcher, HtmlExtractor::new(), Vec::new())
        .run()
        .await
        .unwrap();

    assert_eq!(report.phase(0).count(), 2);
    assert_eq!(report.total_parsed(), 2);
}

fn required_items() -> Schema {
    Schema::new("item")
        .scoped("div.item")
        .required()
        .field(FieldSpec::new("text"))
        .field(
            FieldSpec::new("later")
                .selector("a.later")
                .attr("href")
                .multiple()
                .emit(later()),
        )
}

#[tokio::test]
async fn test_required_schema_aborts_only_its_phase() {
    let (fetcher, script) = shared(
        ScriptedFetcher::new()
            .page(
                &url("/a"),
                r#"<div class="item">one <a class="later" href="/detail">d</a></div>
                   <div class="item">two</div>"#,
            )
            .page(&url("/b"), "<p>no items here</p>")
            .page(&url("/c"), r#"<div class="item">three</div>"#)
            .page(&url("/detail"), &page("Detail", ""))
            .page(&url("/next"), &page("Next", "")),
    );

    let model = CrawlModel::new("strict")
        .with_settings(settings(1))
        .phase(Phase::new("items").seeds(seeds(&["/a", "/b", "/c"])).schema(required_items()))
        .phase(Phase::new("after").seeds(seeds(&["/next"])).schema(page_schema()));

    let (sink, batches) = MemorySink::new("memory");
    let report = Coordinator::new(model, fetcher, HtmlExtractor::new(), vec![sink])
        .run()
        .await
        .unwrap();

    assert!(report.aborted());
    assert_eq!(report.phases.len(), 2);

    let items = &report.phases[0];
    assert_eq!(items.state, PhaseState::Aborted);
    assert_eq!(items.records, 2);
    assert_eq!(items.forwarded, 1);
    assert_conserved(items);

    // The next phase still runs, seeded by what the aborted phase forwarded
    let after = &report.phases[1];
    assert_eq!(after.state, PhaseState::Complete);
    assert_eq!(after.fed, 2);
    assert_conserved(after);

    assert_eq!(script.calls_for(&url("/detail")), 1);
    assert_eq!(script.calls_for(&url("/next")), 1);
    assert_eq!(targets(&batches), vec![url("/a"), url("/detail"), url("/next")]);
}

#[tokio::test]
async fn test_aborted_iteration_is_not_repeated() {
    let (fetcher, script) = shared(
        ScriptedFetcher::new()
            .page(
                &url("/list/1"),
                r#"<div class="item">1 <a class="later" href="/list/2">2</a>
                   <a class="later" href="/list/3">3</a></div>"#,
            )
            .page(
                &url("/list/2"),
                r#"<div class="item">2 <a class="later" href="/list/4">4</a></div>"#,
            )
            .page(&url("/list/3"), "<p>empty</p>")
            .page(&url("/list/4"), &page("4", "")),
    );

    let model = CrawlModel::new("pages")
        .with_settings(settings(1))
        .phase(
            Phase::new("pages")
                .seeds(seeds(&["/list/1"]))
                .schema(required_items())
                .repeat_with(RepeatLimit::new(None, RepeatWhile::Forwarded)),
        )
        .phase(Phase::new("tail").schema(page_schema()));

    let report = Coordinator::new(model, fetcher, HtmlExtractor::new(), Vec::new())
        .run()
        .await
        .unwrap();

    let pages: Vec<&PhaseReport> = report.phase(0).collect();
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].state, PhaseState::Complete);
    assert_eq!(pages[1].state, PhaseState::Aborted);
    assert_eq!(pages[1].forwarded, 1);

    let tail: Vec<&PhaseReport> = report.phase(1).collect();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].fed, 1);
    assert_eq!(script.calls_for(&url("/list/4")), 1);
}

/// `/fast` forwards `/x`; `/slow` takes a while to answer
fn slow_site() -> ScriptedFetcher {
    ScriptedFetcher::new()
        .page(&url("/fast"), &page("fast", r#"<a class="later" href="/x">x</a>"#))
        .reply(
            &url("/slow"),
            Reply::Slow(Duration::from_millis(300), page("slow", "")),
        )
        .page(&url("/x"), &page("x", ""))
}

fn position(order: &[String], path: &str) -> usize {
    order.iter().position(|t| *t == url(path)).unwrap()
}

#[tokio::test]
async fn test_unsynchronized_phase_overlaps_predecessor() {
    let (fetcher, script) = shared(slow_site());

    let model = CrawlModel::new("overlap")
        .with_settings(settings(2))
        .phase(Phase::new("first").seeds(seeds(&["/fast", "/slow"])).schema(page_schema()))
        .phase(Phase::new("second").unsynchronized().schema(page_schema()));

    let report = Coordinator::new(model, fetcher, HtmlExtractor::new(), Vec::new())
        .run()
        .await
        .unwrap();

    let order = script.completed();
    assert!(position(&order, "/x") < position(&order, "/slow"));
    assert_eq!(report.phases.len(), 2);
    assert_eq!(report.phases[1].fed, 1);
    assert_conserved(&report.phases[0]);
    assert_conserved(&report.phases[1]);
}

#[tokio::test]
async fn test_synchronized_phase_waits_for_predecessor() {
    let (fetcher, script) = shared(slow_site());

    let model = CrawlModel::new("ordered")
        .with_settings(settings(2))
        .phase(Phase::new("first").seeds(seeds(&["/fast", "/slow"])).schema(page_schema()))
        .phase(Phase::new("second").schema(page_schema()));

    Coordinator::new(model, fetcher, HtmlExtractor::new(), Vec::new())
        .run()
        .await
        .unwrap();

    let order = script.completed();
    assert!(position(&order, "/slow") < position(&order, "/x"));
}

#[tokio::test]
async fn test_reporter_sees_every_phase() {
    let (fetcher, _script) = shared(
        ScriptedFetcher::new()
            .page(&url("/a"), &page("A", r#"<a class="later" href="/b">b</a>"#))
            .page(&url("/b"), &page("B", "")),
    );
    let reporter = CountingReporter::default();

    let model = CrawlModel::new("report")
        .with_settings(settings(1))
        .phase(Phase::new("one").seeds(seeds(&["/a"])).schema(page_schema()))
        .phase(Phase::new("skipped").inactive().seeds(seeds(&["/zzz"])))
        .phase(Phase::new("two").schema(page_schema()));

    let report = Coordinator::new(model, fetcher, HtmlExtractor::new(), Vec::new())
        .with_reporter(reporter.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(*reporter.started.lock().unwrap(), vec![(0, 0), (2, 0)]);
    let finished = reporter.finished.lock().unwrap();
    assert_eq!(finished.len(), 2);
    assert_eq!(finished[1].name, "two");
    assert_eq!(finished[1].fed, 1);
    assert_eq!(report.phases.len(), 2);
}

#[tokio::test]
async fn test_forwarded_items_carry_parent_fields() {
    let (fetcher, _script) = shared(
        ScriptedFetcher::new()
            .page(
                &url("/shelf"),
                r#"<h2>Poetry</h2><a class="book" href="/book/1">1</a>"#,
            )
            .page(&url("/book/1"), "<h1>Odes</h1>"),
    );

    let shelf = Schema::new("shelf")
        .field(FieldSpec::new("category").selector("h2"))
        .field(
            FieldSpec::new("books").selector("a.book").attr("href").multiple().emit(EmissionRule {
                active: false,
                copy: vec!["category".to_string()],
                link_parent: Some("shelf".to_string()),
                ..Default::default()
            }),
        );
    let book = Schema::new("book").field(FieldSpec::new("title").selector("h1"));

    let model = CrawlModel::new("books")
        .with_settings(settings(1))
        .phase(Phase::new("shelves").seeds(seeds(&["/shelf"])).schema(shelf))
        .phase(Phase::new("books").schema(book));

    let (sink, batches) = MemorySink::new("memory");
    Coordinator::new(model, fetcher, HtmlExtractor::new(), vec![sink])
        .run()
        .await
        .unwrap();

    let batches = batches.lock().unwrap();
    let book = batches.iter().find(|b| b.schema == "book").unwrap();
    let record = &book.records[0];
    assert_eq!(record.get("title"), Some(&json!("Odes")));
    assert_eq!(record.get("category"), Some(&json!("Poetry")));
    assert_eq!(record.get("shelf"), Some(&json!(url("/shelf"))));
}

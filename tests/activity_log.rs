//! End-to-end behavior of `ActivityLog` through its public API.

use actlog::{
    ActionFilter, ActionRecord, ActionType, ActivityLog, ActivityLogConfig, Clock, ManualClock, StoreLocation,
    Timestamp,
};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const WAIT: Duration = Duration::from_secs(5);
const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn open(config: ActivityLogConfig, clock: Arc<ManualClock>) -> ActivityLog {
    ActivityLog::open_with_clock(StoreLocation::InMemory, config, clock).unwrap()
}

/// "brewster" arguments are stripped so its calls merge regardless of args.
fn brewster_config() -> ActivityLogConfig {
    ActivityLogConfig::for_testing().with_stripped_api(ActionType::ApiCall, "brewster")
}

fn url(raw: &str) -> Url {
    Url::parse(raw).unwrap()
}

fn api(extension: &str, time: Timestamp, name: &str) -> ActionRecord {
    ActionRecord::new(extension, time, ActionType::ApiCall, name)
}

fn dom(time: Timestamp, arg: &str) -> ActionRecord {
    let mut record = ActionRecord::new("punky", time, ActionType::DomAccess, "lets");
    record.push_arg(arg);
    record
}

fn read(log: &ActivityLog, extension: &str, day_offset: u32) -> Vec<ActionRecord> {
    log.read_data(extension, day_offset).wait_timeout(WAIT).unwrap()
}

fn filtered(log: &ActivityLog, filter: ActionFilter) -> Vec<ActionRecord> {
    log.read_filtered_data(filter).wait_timeout(WAIT).unwrap()
}

fn printed(records: &[ActionRecord]) -> Vec<String> {
    records.iter().map(ToString::to_string).collect()
}

fn check_url_fields(record: &ActionRecord, page_url: &str, page_title: &str, arg_url: &str) {
    assert_eq!(record.extension_id, "punky");
    assert_eq!(record.action_type, ActionType::DomAccess);
    assert_eq!(record.api_name, "lets");
    assert_eq!(record.args_json(), r#"["vamoose"]"#);
    assert_eq!(record.page_url_string(), page_url);
    assert_eq!(record.page_title.as_deref().unwrap_or(""), page_title);
    assert_eq!(record.arg_url_string(), arg_url);
}

#[test]
fn test_stripped_arguments() {
    let clock = Arc::new(ManualClock::at_local_noon());
    let log = open(ActivityLogConfig::for_testing(), clock.clone());

    let record = api("odlameecjipmbmbejkplpemijjgpljce", clock.now(), "extension.connect")
        .with_args(vec!["hello".into(), "world".into()]);
    log.submit(record);

    let records = read(&log, "odlameecjipmbmbejkplpemijjgpljce", 0);
    assert_eq!(
        printed(&records),
        vec!["ID=odlameecjipmbmbejkplpemijjgpljce CATEGORY=api_call API=extension.connect COUNT=1"]
    );
    log.close();
}

#[test]
fn test_todays_actions() {
    let clock = Arc::new(ManualClock::at_local_noon());
    let log = open(brewster_config(), clock.clone());
    let now = clock.now();

    log.submit(api("punky", now - 40 * MINUTE, "brewster").with_args(vec!["woof".into()]));
    log.submit(api("punky", now - 30 * MINUTE, "brewster").with_args(vec!["meow".into()]));
    log.submit(
        api("punky", now - 20 * MINUTE, "extension.sendMessage").with_args(vec!["not".into(), "stripped".into()]),
    );
    log.submit(dom(now, "vamoose").with_page_url(url("http://www.google.com")));

    let mut other = dom(now, "vamoose").with_page_url(url("http://www.google.com"));
    other.extension_id = "scoobydoo".into();
    log.submit(other);

    assert_eq!(
        printed(&read(&log, "punky", 0)),
        vec![
            "ID=punky CATEGORY=dom_access API=lets ARGS=[\"vamoose\"] PAGE_URL=http://www.google.com/ COUNT=1",
            "ID=punky CATEGORY=api_call API=extension.sendMessage ARGS=[\"not\",\"stripped\"] COUNT=1",
            "ID=punky CATEGORY=api_call API=brewster COUNT=2",
        ]
    );
    log.close();
}

#[test]
fn test_older_actions() {
    let clock = Arc::new(ManualClock::at_local_noon());
    let log = open(brewster_config(), clock.clone());
    let now = clock.now();

    log.submit(api("punky", now - 3 * DAY - 40 * MINUTE, "brewster").with_args(vec!["woof".into()]));
    log.submit(dom(now - 3 * DAY, "vamoose").with_page_url(url("http://www.google.com")));
    log.submit(dom(now, "too new").with_page_url(url("http://www.google.com")));
    log.submit(dom(now - 7 * DAY, "too old").with_page_url(url("http://www.google.com")));

    assert_eq!(
        printed(&read(&log, "punky", 3)),
        vec![
            "ID=punky CATEGORY=dom_access API=lets ARGS=[\"vamoose\"] PAGE_URL=http://www.google.com/ COUNT=1",
            "ID=punky CATEGORY=api_call API=brewster COUNT=1",
        ]
    );

    // Same answer once everything is persisted.
    log.flush();
    assert_eq!(read(&log, "punky", 3).len(), 2);
    log.close();
}

#[test]
fn test_filtered_actions() {
    let extension = "odlameecjipmbmbejkplpemijjgpljce";
    let log = ActivityLog::open_in_memory(ActivityLogConfig::for_testing()).unwrap();

    log.submit(api(extension, Timestamp::now(), "tabs.testMethod").with_args(Vec::new()));
    log.submit(
        ActionRecord::new(extension, Timestamp::now(), ActionType::DomAccess, "document.write")
            .with_args(Vec::new())
            .with_page_url(url("http://www.google.com")),
    );

    let by_api = ActionFilter::new()
        .extension(extension)
        .action_type(ActionType::ApiCall)
        .api_prefix("tabs.testMethod");
    assert_eq!(filtered(&log, by_api).len(), 1);

    let dom_only = || ActionFilter::new().action_type(ActionType::DomAccess);
    assert_eq!(filtered(&log, dom_only()).len(), 1);
    assert_eq!(filtered(&log, dom_only().page_url_prefix("http://www.google.com/")).len(), 1);
    assert_eq!(filtered(&log, dom_only().page_url_prefix("http://www.google.com")).len(), 1);
    assert_eq!(filtered(&log, dom_only().page_url_prefix("http://www.goo")).len(), 1);

    let any = ActionFilter::new().extension(extension).action_type(ActionType::Any);
    assert_eq!(filtered(&log, any.clone()).len(), 2);

    log.flush();
    assert_eq!(filtered(&log, any).len(), 2);
    assert!(filtered(&log, ActionFilter::new().arg_url("not a url")).is_empty());
    log.close();
}

#[test]
fn test_merging_and_expiring() {
    let clock = Arc::new(ManualClock::at_local_noon());
    let log = open(brewster_config(), clock.clone());
    let now = clock.now();

    // The first two merge; the third lands on a different day.
    log.submit(api("punky", now - 3 * DAY - 40 * MINUTE, "brewster"));
    log.submit(api("punky", now - 3 * DAY - 20 * MINUTE, "brewster"));
    log.submit(api("punky", now - 2 * DAY - 20 * MINUTE, "brewster"));

    assert_eq!(printed(&read(&log, "punky", 3)), vec!["ID=punky CATEGORY=api_call API=brewster COUNT=2"]);
    assert_eq!(printed(&read(&log, "punky", 2)), vec!["ID=punky CATEGORY=api_call API=brewster COUNT=1"]);

    // Everything before midnight two days ago goes.
    log.set_retention(2 * DAY);
    log.force_cleaning_now();
    log.submit(api("punky", now, "brewster"));
    log.flush();

    assert!(read(&log, "punky", 3).is_empty());
    assert_eq!(printed(&read(&log, "punky", 2)), vec!["ID=punky CATEGORY=api_call API=brewster COUNT=1"]);
    assert_eq!(read(&log, "punky", 0).len(), 1);
    log.close();
}

#[test]
fn test_string_table_cleaning() {
    let clock = Arc::new(ManualClock::new(Timestamp::now()));
    let log = open(ActivityLogConfig::for_testing(), clock.clone());
    let now = clock.now();

    log.submit(api("punky", now - 7 * DAY, "brewster").with_page_url(url("http://www.google.com/")));
    log.submit(api("punky", now, "tabs.create"));
    log.flush();

    // "punky", "brewster", "tabs.create" and one page URL.
    let stats = log.stats().unwrap();
    assert_eq!((stats.strings, stats.urls), (3, 1));

    log.set_retention(2 * DAY);
    log.force_cleaning_now();
    log.submit(api("punky", now, "tabs.create"));
    log.flush();

    let stats = log.stats().unwrap();
    assert_eq!((stats.strings, stats.urls), (2, 0));
    assert_eq!(stats.rows, 1);
    log.close();
}

#[test]
fn test_more_merging() {
    let clock = Arc::new(ManualClock::at_local_noon());
    let log = open(brewster_config(), clock.clone());
    let now = clock.now();

    // Out of order across days, with flushes in between so the merges happen
    // against persisted rows.
    let time1 = now - 2 * DAY - 40 * MINUTE;
    let time2 = now - DAY - 40 * MINUTE;
    let time3 = now - 2 * DAY - 20 * MINUTE;
    for time in [time1, time2, time3] {
        log.submit(api("punky", time, "brewster"));
        log.flush();
    }

    let two_days = read(&log, "punky", 2);
    assert_eq!(printed(&two_days), vec!["ID=punky CATEGORY=api_call API=brewster COUNT=2"]);
    assert_eq!(two_days[0].time, time3);

    let one_day = read(&log, "punky", 1);
    assert_eq!(printed(&one_day), vec!["ID=punky CATEGORY=api_call API=brewster COUNT=1"]);
    assert_eq!(one_day[0].time, time2);

    // Today's merges stay in memory; the latest timestamp wins.
    let time4 = now - 60 * MINUTE;
    let time5 = now - 20 * MINUTE;
    let time6 = now - 40 * MINUTE;
    for time in [time4, time5, time6] {
        log.submit(api("punky", time, "brewster"));
    }

    let today = read(&log, "punky", 0);
    assert_eq!(printed(&today), vec!["ID=punky CATEGORY=api_call API=brewster COUNT=3"]);
    assert_eq!(today[0].time, time5);
    assert_eq!(log.stats().unwrap().rows, 2);
    log.close();
}

#[test]
fn test_early_flush() {
    let log = ActivityLog::open_in_memory(ActivityLogConfig::for_testing()).unwrap();

    for i in 0..500 {
        log.submit(api("punky", Timestamp::now(), &format!("apicall_{}", i)));
    }

    // Two batches of 200 were sealed and handed over before the stats request.
    let stats = log.stats().unwrap();
    assert_eq!(stats.rows, 400);
    assert_eq!(stats.buffered, 100);
    assert!(stats.buffered <= 200);
    log.close();
}

#[test]
fn test_remove_all_urls() {
    let clock = Arc::new(ManualClock::at_local_noon());
    let log = open(ActivityLogConfig::for_testing(), clock.clone());

    log.submit(
        dom(clock.now(), "vamoose")
            .with_page_url(url("http://www.google.com"))
            .with_page_title("Google")
            .with_arg_url(url("http://www.args-url.com")),
    );
    clock.advance(Duration::from_secs(1));
    log.submit(
        dom(clock.now(), "vamoose")
            .with_page_url(url("http://www.google2.com"))
            .with_page_title("Google"),
    );

    log.remove_urls(&[]);

    // The scrubbed rows now share a key but are not merged.
    let records = read(&log, "punky", 0);
    assert_eq!(records.len(), 2);
    for record in &records {
        check_url_fields(record, "", "", "");
    }
    log.close();
}

#[test]
fn test_remove_specific_urls() {
    let clock = Arc::new(ManualClock::at_local_noon());
    let log = open(ActivityLogConfig::for_testing(), clock.clone());

    let submit = |page: &str, arg: Option<&str>| {
        let mut record = dom(clock.now(), "vamoose")
            .with_page_url(url(page))
            .with_page_title("Google");
        if let Some(arg) = arg {
            record = record.with_arg_url(url(arg));
        }
        log.submit(record);
        clock.advance(Duration::from_secs(1));
    };

    // Both fields cleared.
    submit("http://www.google1.com", Some("http://www.google1.com"));
    // Page cleared, argument kept.
    submit("http://www.google1.com", Some("http://www.google.com"));
    // Page cleared, no argument URL at all.
    submit("http://www.google2.com", None);
    // Argument cleared, page and title kept.
    submit("http://www.google.com", Some("http://www.google1.com"));
    // Untouched.
    submit("http://www.google.com", Some("http://www.args-url.com"));

    log.remove_urls(&[
        url("http://www.google1.com"),
        url("http://www.google2.com"),
        url("http://www.url_not_in_db.com"),
    ]);

    let records = read(&log, "punky", 0);
    assert_eq!(records.len(), 5);
    check_url_fields(&records[0], "http://www.google.com/", "Google", "http://www.args-url.com/");
    check_url_fields(&records[1], "http://www.google.com/", "Google", "");
    check_url_fields(&records[2], "", "", "");
    check_url_fields(&records[3], "", "", "http://www.google.com/");
    check_url_fields(&records[4], "", "", "");
    log.close();
}

#[test]
fn test_reopen_recovers_rows() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::at_local_noon());
    let location = StoreLocation::Directory(dir.path().to_path_buf());

    let log = ActivityLog::open_with_clock(location.clone(), brewster_config(), clock.clone()).unwrap();
    assert!(!log.is_degraded());
    log.submit(api("punky", clock.now() - 10 * MINUTE, "brewster"));
    log.submit(api("punky", clock.now(), "brewster"));
    log.submit(dom(clock.now(), "vamoose").with_page_url(url("http://www.google.com")));
    log.close();

    let log = ActivityLog::open_with_clock(location.clone(), brewster_config(), clock.clone()).unwrap();
    let stats = log.stats().unwrap();
    assert!(stats.persistent);
    assert_eq!(stats.rows, 2);
    assert_eq!(
        printed(&read(&log, "punky", 0)),
        vec![
            "ID=punky CATEGORY=dom_access API=lets ARGS=[\"vamoose\"] PAGE_URL=http://www.google.com/ COUNT=1",
            "ID=punky CATEGORY=api_call API=brewster COUNT=2",
        ]
    );

    // Further merges land on the recovered row.
    log.submit(api("punky", clock.now(), "brewster"));
    log.flush();
    drop(log);

    let log = ActivityLog::open_with_clock(location, brewster_config(), clock.clone()).unwrap();
    let records = filtered(&log, ActionFilter::new().api_prefix("brew"));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].count, 3);
    log.close();
}

#[test]
fn test_unusable_directory_runs_degraded() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"occupied").unwrap();

    let clock = Arc::new(ManualClock::at_local_noon());
    let log = ActivityLog::open_with_clock(
        StoreLocation::Directory(blocker),
        ActivityLogConfig::for_testing(),
        clock.clone(),
    )
    .unwrap();
    assert!(log.is_degraded());

    log.submit(api("punky", clock.now(), "brewster"));
    assert_eq!(log.buffered_len(), 1);
    assert!(read(&log, "punky", 0).is_empty());

    log.flush();
    let stats = log.stats().unwrap();
    assert!(!stats.available);
    assert_eq!(stats.buffered, 0);
    log.close();
}

#[test]
fn test_concurrent_submitters() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 250;

    let clock = Arc::new(ManualClock::at_local_noon());
    let log = open(ActivityLogConfig::for_testing(), clock.clone());
    let now = clock.now();

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let log = &log;
            scope.spawn(move || {
                for i in 0..PER_THREAD {
                    log.submit(api("punky", now, "shared.call"));
                    log.submit(api("punky", now, &format!("thread{}.call{}", t, i)));
                }
            });
        }
    });
    log.flush();

    let stats = log.stats().unwrap();
    assert_eq!(stats.rows, THREADS * PER_THREAD + 1);
    assert_eq!(stats.buffered, 0);

    let records = read(&log, "punky", 0);
    assert_eq!(records.len(), THREADS * PER_THREAD + 1);
    let total: usize = records.iter().map(|r| r.count as usize).sum();
    assert_eq!(total, 2 * THREADS * PER_THREAD);

    let shared = filtered(&log, ActionFilter::new().api_prefix("shared."));
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].count as usize, THREADS * PER_THREAD);
    log.close();
}

/// Log whose journal sits on a device that rejects every write.
#[cfg(target_os = "linux")]
fn open_with_full_journal(
    config: ActivityLogConfig,
    clock: Arc<ManualClock>,
) -> Option<(tempfile::TempDir, ActivityLog)> {
    let full = std::path::Path::new("/dev/full");
    if !full.exists() {
        return None;
    }
    let dir = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink(full, dir.path().join(actlog::storage::journal::JOURNAL_FILE)).unwrap();

    let location = StoreLocation::Directory(dir.path().to_path_buf());
    let log = ActivityLog::open_with_clock(location, config, clock).unwrap();
    assert!(!log.is_degraded());
    Some((dir, log))
}

#[cfg(target_os = "linux")]
#[test]
fn test_remove_urls_scrubs_unflushed_entries() {
    let clock = Arc::new(ManualClock::at_local_noon());
    let Some((_dir, log)) = open_with_full_journal(ActivityLogConfig::for_testing(), clock.clone()) else {
        return;
    };

    log.submit(
        dom(clock.now(), "vamoose")
            .with_page_url(url("http://www.google.com"))
            .with_page_title("Google")
            .with_arg_url(url("http://www.args-url.com")),
    );
    log.remove_urls(&[]);

    // The flush failed, so the entry is still buffered, but without its URLs.
    let records = read(&log, "punky", 0);
    assert_eq!(records.len(), 1);
    check_url_fields(&records[0], "", "", "");

    let stats = log.stats().unwrap();
    assert!(stats.available);
    assert_eq!(stats.buffered, 1);
    log.close();
}

#[cfg(target_os = "linux")]
#[test]
fn test_failing_store_is_abandoned() {
    let mut config = ActivityLogConfig::for_testing();
    config.flush_threshold = 10;
    let clock = Arc::new(ManualClock::at_local_noon());
    let Some((_dir, log)) = open_with_full_journal(config, clock.clone()) else {
        return;
    };

    for i in 0..1000 {
        log.submit(api("punky", clock.now(), &format!("apicall_{}", i)));
    }

    let stats = log.stats().unwrap();
    assert!(!stats.available);
    assert!(stats.buffered <= 10, "buffered {}", stats.buffered);
    assert!(log.is_degraded());
    assert!(read(&log, "punky", 0).is_empty());

    // Still accepts submissions and drops them on flush.
    log.submit(api("punky", clock.now(), "brewster"));
    log.flush();
    assert_eq!(log.stats().unwrap().buffered, 0);
    log.close();
}

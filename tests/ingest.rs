mod common;

fn data_line(count: &str, text: &str) -> String {
    format!("{count:<5}   {:<8}   {:<8} {text}", "", "")
}

fn profile_report(script_path: &str, lines: &[(&str, &str)]) -> String {
    let mut out = format!("SCRIPT  {script_path}\nSourced 1 time\ncount  total (s)   self (s)\n");
    for (count, text) in lines {
        out.push_str(&data_line(count, text));
        out.push('\n');
    }
    out
}

/// Test the full `ingest::ingest()` pipeline: read files from disk, parse,
/// reconcile, merge, and insert.
#[test]
fn ingest_single_profile_file() {
    let (mut conn, dir, _) = common::setup_db();

    let path = dir.path().join("profile.txt");
    std::fs::write(
        &path,
        profile_report("/t/x.vim", &[("3", "echo 1"), ("", "echo 2"), ("0", "echo 3")]),
    )
    .unwrap();

    let (report_id, name) = covrs::ingest::ingest(&mut conn, &[path], &[], None, false).unwrap();

    assert!(report_id > 0);
    assert_eq!(name, "profile.txt");

    let lines = covrs::db::get_lines(&conn, "/t/x.vim").unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].line_number, 1);
}

#[test]
fn ingest_multiple_profile_files_merges_counts() {
    let (mut conn, dir, _) = common::setup_db();

    let path_a = dir.path().join("a.txt");
    std::fs::write(&path_a, profile_report("/t/x.vim", &[("2", "echo 1")])).unwrap();

    let path_b = dir.path().join("b.txt");
    std::fs::write(&path_b, profile_report("/t/x.vim", &[("", "echo 1")])).unwrap();

    let (_id, _name) =
        covrs::ingest::ingest(&mut conn, &[path_a, path_b], &[], Some("merged"), false).unwrap();

    let lines = covrs::db::get_lines(&conn, "/t/x.vim").unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].hit_count, 1);
}

#[test]
fn ingest_with_custom_report_name() {
    let (mut conn, dir, _) = common::setup_db();

    let path = dir.path().join("profile.txt");
    std::fs::write(&path, profile_report("/t/x.vim", &[("1", "echo 1")])).unwrap();

    let (_id, name) =
        covrs::ingest::ingest(&mut conn, &[path], &[], Some("my-report"), false).unwrap();

    assert_eq!(name, "my-report");
    let reports = covrs::db::list_reports(&conn).unwrap();
    assert_eq!(reports[0].name, "my-report");
    assert_eq!(reports[0].format, "vimprofile");
}

#[test]
fn ingest_filters_to_source_roots() {
    let (mut conn, dir, _) = common::setup_db();

    let src_root = dir.path().join("src");
    std::fs::create_dir_all(&src_root).unwrap();
    let kept = src_root.join("kept.vim");
    std::fs::write(&kept, "\" empty\n").unwrap();

    let script_path = "/tmp/outside.vim";
    let path = dir.path().join("profile.txt");
    std::fs::write(&path, profile_report(script_path, &[("1", "echo 1")])).unwrap();

    covrs::ingest::ingest(&mut conn, &[path], &[src_root], None, false).unwrap();

    let summaries = covrs::db::get_file_summaries(&conn).unwrap();
    assert!(summaries.iter().all(|f| f.path != script_path));
}

#[test]
fn ingest_records_file_tracer_and_round_trips_through_summary_and_lines() {
    let (mut conn, dir, _) = common::setup_db();

    let path_a = dir.path().join("a.txt");
    std::fs::write(
        &path_a,
        profile_report("/t/x.vim", &[("1", "echo 1"), ("0", "echo 2")]),
    )
    .unwrap();
    let path_b = dir.path().join("b.txt");
    std::fs::write(&path_b, profile_report("/t/y.vim", &[("2", "echo 1")])).unwrap();

    covrs::ingest::ingest(&mut conn, &[path_a, path_b], &[], Some("multi"), false).unwrap();

    let tracer: String = conn
        .query_row(
            "SELECT file_tracer FROM source_file WHERE path = '/t/x.vim'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(tracer, covrs::profile::FILE_TRACER_TAG);

    let summaries = covrs::db::get_file_summaries(&conn).unwrap();
    assert_eq!(summaries.len(), 2);
    let x = summaries.iter().find(|f| f.path == "/t/x.vim").unwrap();
    assert_eq!(x.total_lines, 2);
    assert_eq!(x.covered_lines, 1);

    let lines = covrs::db::get_lines(&conn, "/t/y.vim").unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].hit_count, 1);
}

#[test]
fn ingest_empty_report_still_creates_report() {
    let (mut conn, dir, _) = common::setup_db();

    let path = dir.path().join("empty.txt");
    std::fs::write(&path, "").unwrap();

    let (report_id, _name) = covrs::ingest::ingest(&mut conn, &[path], &[], None, false).unwrap();
    assert!(report_id > 0);
}

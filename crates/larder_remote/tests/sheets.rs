//! SheetsRemote against an in-process values API.

use larder_codec::{record, Value};
use larder_remote::{
    a1, HttpClient, HttpFailure, HttpRequest, HttpResponse, Method, RemoteClient, RemoteErrorKind,
    RowUpdate, SheetsConfig, SheetsRemote, StaticToken,
};
use parking_lot::Mutex;
use serde_json::{json, Value as Json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const TOKEN: &str = "test-token";

/// Minimal values API: one grid of JSON cells per sheet.
#[derive(Default)]
struct FakeSheets {
    sheets: Mutex<HashMap<String, Vec<Vec<Json>>>>,
    log: Mutex<Vec<HttpRequest>>,
    fail_next: Mutex<Option<Result<u16, HttpFailure>>>,
}

impl FakeSheets {
    fn with_sheet(self, name: &str, rows: Vec<Vec<Json>>) -> Self {
        self.sheets.lock().insert(name.to_string(), rows);
        self
    }

    fn row(&self, sheet: &str, row: usize) -> Vec<Json> {
        self.sheets.lock()[sheet].get(row - 1).cloned().unwrap_or_default()
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().clone()
    }

    fn fail_next(&self, outcome: Result<u16, HttpFailure>) {
        *self.fail_next.lock() = Some(outcome);
    }
}

fn decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap();
            out.push(u8::from_str_radix(hex, 16).unwrap());
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).unwrap()
}

/// Splits `'Sheet'!A5:C5` into the sheet name and the row, if any.
fn split_range(range: &str) -> (String, Option<usize>) {
    let (sheet, cells) = match range.strip_prefix('\'') {
        Some(rest) => {
            let end = rest.find('\'').unwrap();
            (rest[..end].to_string(), rest[end + 1..].trim_start_matches('!'))
        }
        None => match range.split_once('!') {
            Some((sheet, cells)) => (sheet.to_string(), cells),
            None => (range.to_string(), ""),
        },
    };
    let row = if cells.is_empty() {
        None
    } else {
        a1::first_row(&format!("x!{cells}")).map(|r| r as usize)
    };
    (sheet, row)
}

fn ok(body: Json) -> Result<HttpResponse, HttpFailure> {
    Ok(HttpResponse {
        status: 200,
        body: body.to_string(),
    })
}

fn status(code: u16) -> Result<HttpResponse, HttpFailure> {
    Ok(HttpResponse {
        status: code,
        body: json!({ "error": { "code": code } }).to_string(),
    })
}

/// Writes `cells` over a row. `null` cells are skipped, as the values API does.
fn write_row(grid: &mut Vec<Vec<Json>>, row: usize, cells: Vec<Json>) {
    if grid.len() < row {
        grid.resize(row, Vec::new());
    }
    let target = &mut grid[row - 1];
    if target.len() < cells.len() {
        target.resize(cells.len(), Json::Null);
    }
    for (index, cell) in cells.into_iter().enumerate() {
        if !cell.is_null() {
            target[index] = cell;
        }
    }
}

impl HttpClient for FakeSheets {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpFailure> {
        self.log.lock().push(request.clone());
        if let Some(outcome) = self.fail_next.lock().take() {
            return outcome.and_then(status);
        }
        if request.bearer.as_deref() != Some(TOKEN) {
            return status(401);
        }

        let url = Url::parse(&request.url).unwrap();
        let segments: Vec<String> = url.path_segments().unwrap().map(decode).collect();
        // v4 / spreadsheets / {id} / ...
        assert_eq!(&segments[..2], ["v4", "spreadsheets"]);
        let mut sheets = self.sheets.lock();

        if segments[3] == "values:batchUpdate" {
            let body = request.body.as_ref().unwrap();
            for item in body["data"].as_array().unwrap() {
                let (sheet, row) = split_range(item["range"].as_str().unwrap());
                let Some(grid) = sheets.get_mut(&sheet) else {
                    return status(404);
                };
                write_row(grid, row.unwrap(), item["values"][0].as_array().unwrap().clone());
            }
            return ok(json!({ "totalUpdatedRows": body["data"].as_array().unwrap().len() }));
        }

        assert_eq!(segments[3], "values");
        let target = &segments[4];
        let (range, action) = if let Some(r) = target.strip_suffix(":append") {
            (r, "append")
        } else if let Some(r) = target.strip_suffix(":clear") {
            (r, "clear")
        } else {
            (target.as_str(), "")
        };
        let (sheet, row) = split_range(range);
        let Some(grid) = sheets.get_mut(&sheet) else {
            return status(404);
        };

        match (request.method, action) {
            (Method::Get, "") => match row {
                None => ok(json!({ "range": range, "values": grid })),
                Some(row) => match grid.get(row - 1) {
                    Some(cells) if !cells.is_empty() => ok(json!({ "range": range, "values": [cells] })),
                    _ => ok(json!({ "range": range })),
                },
            },
            (Method::Put, "") => {
                let body = request.body.as_ref().unwrap();
                write_row(grid, row.unwrap(), body["values"][0].as_array().unwrap().clone());
                ok(json!({ "updatedRows": 1 }))
            }
            (Method::Post, "append") => {
                let body = request.body.as_ref().unwrap();
                let cells = body["values"][0].as_array().unwrap().clone();
                let new_row = grid.len() + 1;
                grid.push(cells);
                ok(json!({
                    "updates": { "updatedRange": format!("'{sheet}'!A{new_row}:Z{new_row}") }
                }))
            }
            (Method::Post, "clear") => {
                grid[row.unwrap() - 1].clear();
                ok(json!({ "clearedRange": range }))
            }
            _ => status(400),
        }
    }
}

fn products() -> FakeSheets {
    FakeSheets::default().with_sheet(
        "Products",
        vec![
            vec![json!("id"), json!("name"), json!("price"), json!("updated_at")],
            vec![json!(1), json!("Rye"), json!(4.5), json!(1_000)],
            vec![],
            vec![json!(2), json!("Spelt"), json!(""), json!("1970-01-01T00:00:02Z")],
        ],
    )
}

fn remote(server: Arc<FakeSheets>) -> SheetsRemote<Arc<FakeSheets>> {
    let config = SheetsConfig::new("https://sheets.test/", "sheet-123")
        .unwrap()
        .with_request_timeout(Duration::from_secs(7))
        .with_modified_column("updated_at");
    let remote = SheetsRemote::new(config, server, Arc::new(StaticToken::new(TOKEN)));
    remote.authenticate().unwrap();
    remote
}

#[test]
fn reads_rows_after_header_and_skips_blanks() {
    let server = Arc::new(products());
    let remote = remote(server.clone());

    let records = remote.read_collection("Products").unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].remote_id, "2");
    assert_eq!(records[1].remote_id, "4");
    assert_eq!(records[0].fields["name"], Value::Text("Rye".into()));
    assert_eq!(records[0].modified_at, Some(1_000));
    assert_eq!(records[1].modified_at, Some(2_000));
    assert!(records[0].version.is_some());

    let request = &server.requests()[0];
    assert_eq!(request.timeout, Duration::from_secs(7));
    assert_eq!(request.bearer.as_deref(), Some(TOKEN));
    assert!(request.url.contains("valueRenderOption=UNFORMATTED_VALUE"));
}

#[test]
fn versions_are_stable_between_reads() {
    let remote = remote(Arc::new(products()));
    let first = remote.read_collection("Products").unwrap();
    let second = remote.read_collection("Products").unwrap();
    assert_eq!(first, second);
}

#[test]
fn append_returns_row_number_and_stamps_modification() {
    let server = Arc::new(products());
    let remote = remote(server.clone());

    let write = remote
        .append_row("Products", &record! { "id" => 3, "name" => "Oat", "price" => 2 })
        .unwrap();
    assert_eq!(write.remote_id, "5");

    let row = server.row("Products", 5);
    assert_eq!(row[0], json!(3));
    assert!(row[3].as_i64().is_some(), "modification column stamped");

    let read = remote.read_collection("Products").unwrap();
    let appended = read.iter().find(|r| r.remote_id == "5").unwrap();
    assert_eq!(appended.version, write.version);
}

#[test]
fn compare_and_swap_update() {
    let server = Arc::new(products());
    let remote = remote(server.clone());
    let rye = remote.read_collection("Products").unwrap().remove(0);

    let fields = record! { "id" => 1, "name" => "Rye (dark)", "price" => 5.0, "updated_at" => 3_000 };
    let write = remote
        .update_row("Products", &rye.remote_id, &fields, rye.version.as_deref())
        .unwrap();
    assert_eq!(server.row("Products", 2)[1], json!("Rye (dark)"));

    // the old version is now stale
    let err = remote
        .update_row("Products", &rye.remote_id, &fields, rye.version.as_deref())
        .unwrap_err();
    assert_eq!(err.kind, RemoteErrorKind::Conflict);

    assert!(remote
        .update_row("Products", &rye.remote_id, &fields, write.version.as_deref())
        .is_ok());
}

fn with_notes() -> FakeSheets {
    FakeSheets::default().with_sheet(
        "Products",
        vec![
            vec![json!("id"), json!("name"), json!("notes")],
            vec![json!(1), json!("Rye"), json!("keep me")],
            vec![json!(2), json!("Spelt"), json!("and me")],
        ],
    )
}

#[test]
fn update_keeps_columns_the_record_does_not_carry() {
    let server = Arc::new(with_notes());
    let remote = remote(server.clone());
    let rye = remote.read_collection("Products").unwrap().remove(0);

    let write = remote
        .update_row("Products", &rye.remote_id, &record! { "id" => 1, "name" => "Rye2" }, rye.version.as_deref())
        .unwrap();
    let row = server.row("Products", 2);
    assert_eq!(row[1], json!("Rye2"));
    assert_eq!(row[2], json!("keep me"));

    let read = remote.read_collection("Products").unwrap();
    assert_eq!(read[0].fields["notes"], Value::Text("keep me".into()));
    assert_eq!(read[0].version, write.version);

    // without a version the row is read for the merge
    let write = remote
        .update_row("Products", &rye.remote_id, &record! { "id" => 1, "name" => "Rye3" }, None)
        .unwrap();
    assert_eq!(server.row("Products", 2)[2], json!("keep me"));
    let read = remote.read_collection("Products").unwrap();
    assert_eq!(read[0].version, write.version);

    // an explicit null still clears the cell
    remote
        .update_row("Products", &rye.remote_id, &record! { "id" => 1, "notes" => Value::Null }, None)
        .unwrap();
    let row = server.row("Products", 2);
    assert_eq!(row[1], json!("Rye3"));
    assert_eq!(row[2], json!(""));
}

#[test]
fn batch_update_keeps_columns_the_record_does_not_carry() {
    let server = Arc::new(with_notes());
    let remote = remote(server.clone());
    let records = remote.read_collection("Products").unwrap();

    let updates = vec![
        RowUpdate {
            remote_id: records[0].remote_id.clone(),
            fields: record! { "id" => 1, "name" => "A" },
            expected_version: records[0].version.clone(),
        },
        RowUpdate {
            remote_id: records[1].remote_id.clone(),
            fields: record! { "id" => 2, "name" => "B" },
            expected_version: None,
        },
    ];
    let outcome = remote.batch_update("Products", &updates).unwrap();

    assert_eq!(server.row("Products", 2)[2], json!("keep me"));
    assert_eq!(server.row("Products", 3)[2], json!("and me"));
    let read = remote.read_collection("Products").unwrap();
    for (record, result) in read.iter().zip(&outcome.results) {
        assert_eq!(record.version, result.as_ref().unwrap().version);
    }
}

#[test]
fn update_of_cleared_row_is_not_found() {
    let remote = remote(Arc::new(products()));
    let err = remote
        .update_row("Products", "3", &record! { "id" => 9 }, Some("deadbeef"))
        .unwrap_err();
    assert_eq!(err.kind, RemoteErrorKind::NotFound);

    let err = remote
        .update_row("Products", "1", &record! { "id" => 9 }, None)
        .unwrap_err();
    assert_eq!(err.kind, RemoteErrorKind::NotFound);
}

#[test]
fn delete_clears_without_shifting_rows() {
    let remote = remote(Arc::new(products()));
    let records = remote.read_collection("Products").unwrap();
    remote
        .delete_row("Products", &records[0].remote_id, records[0].version.as_deref())
        .unwrap();

    let after = remote.read_collection("Products").unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].remote_id, "4");

    let err = remote.delete_row("Products", "2", None).unwrap_err();
    assert_eq!(err.kind, RemoteErrorKind::NotFound);
}

#[test]
fn batch_update_reports_each_row_and_sends_once() {
    let server = Arc::new(products());
    let remote = remote(server.clone());
    let records = remote.read_collection("Products").unwrap();

    let updates = vec![
        RowUpdate {
            remote_id: records[0].remote_id.clone(),
            fields: record! { "id" => 1, "name" => "A", "updated_at" => 5 },
            expected_version: records[0].version.clone(),
        },
        RowUpdate {
            remote_id: records[1].remote_id.clone(),
            fields: record! { "id" => 2, "name" => "B", "updated_at" => 5 },
            expected_version: Some("stale".into()),
        },
        RowUpdate {
            remote_id: "3".into(),
            fields: record! { "id" => 7 },
            expected_version: Some("whatever".into()),
        },
    ];
    let before = server.requests().len();
    let outcome = remote.batch_update("Products", &updates).unwrap();

    assert!(outcome.results[0].is_ok());
    assert_eq!(outcome.results[1].as_ref().unwrap_err().kind, RemoteErrorKind::Conflict);
    assert_eq!(outcome.results[2].as_ref().unwrap_err().kind, RemoteErrorKind::NotFound);

    let sent: Vec<_> = server.requests()[before..]
        .iter()
        .filter(|r| r.url.contains("values:batchUpdate"))
        .cloned()
        .collect();
    assert_eq!(sent.len(), 1);
    assert_eq!(server.row("Products", 2)[1], json!("A"));
    assert_eq!(server.row("Products", 4)[1], json!("Spelt"));
}

#[test]
fn data_calls_need_authentication() {
    let server = Arc::new(products());
    let config = SheetsConfig::new("https://sheets.test/", "sheet-123").unwrap();
    let remote = SheetsRemote::new(config, server.clone(), Arc::new(StaticToken::new("")));

    assert_eq!(
        remote.read_collection("Products").unwrap_err().kind,
        RemoteErrorKind::Unauthorized
    );
    assert!(server.requests().is_empty());
    assert_eq!(remote.authenticate().unwrap_err().kind, RemoteErrorKind::Unauthorized);
}

#[test]
fn transport_failures_map_to_kinds() {
    let server = Arc::new(products());
    let remote = remote(server.clone());

    server.fail_next(Err(HttpFailure::Timeout));
    assert_eq!(
        remote.read_collection("Products").unwrap_err().kind,
        RemoteErrorKind::Unavailable
    );

    server.fail_next(Ok(503));
    assert_eq!(
        remote.read_collection("Products").unwrap_err().kind,
        RemoteErrorKind::Unavailable
    );

    server.fail_next(Ok(401));
    assert_eq!(
        remote.read_collection("Products").unwrap_err().kind,
        RemoteErrorKind::Unauthorized
    );

    assert_eq!(
        remote.read_collection("Missing").unwrap_err().kind,
        RemoteErrorKind::NotFound
    );
}

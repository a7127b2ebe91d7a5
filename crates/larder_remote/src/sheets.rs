//! Spreadsheet values remote.
//!
//! Each collection is one sheet of a spreadsheet exposed through a values
//! API (`GET/PUT .../values/{range}`, `:append`, `:clear`,
//! `values:batchUpdate`). Row 1 holds the field names; every later non-blank
//! row is a record whose remote id is its 1-based row number.
//!
//! The sheet keeps no versions of its own, so a record's version is a hash
//! of its cells. Compare-and-swap re-reads the row before writing. Deletes
//! clear the row rather than removing it, so the row numbers of other
//! records never shift. Header columns a record does not carry are sent as
//! JSON `null`, which the values API skips, so columns the local table does
//! not declare keep their remote contents.

use crate::a1;
use crate::client::{BatchOutcome, RemoteClient, RemoteRecord, RemoteWrite, RowUpdate};
use crate::error::{RemoteError, RemoteResult};
use crate::http::{HttpClient, HttpFailure, HttpRequest, Method};
use crate::probe::probe_tcp;
use crate::token::TokenSource;
use larder_codec::{value_from_json, value_to_json, Record, Value};
use parking_lot::RwLock;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Connection settings for [`SheetsRemote`].
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    /// API root, e.g. `https://sheets.googleapis.com/`.
    pub base_url: Url,
    /// Spreadsheet holding one sheet per collection.
    pub spreadsheet_id: String,
    /// Deadline for every request.
    pub request_timeout: Duration,
    /// Field holding the remote modification time (ms or RFC 3339), if any.
    pub modified_column: Option<String>,
}

impl SheetsConfig {
    /// Creates a configuration with a 30 second request timeout.
    pub fn new(base_url: &str, spreadsheet_id: impl Into<String>) -> Result<Self, url::ParseError> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            spreadsheet_id: spreadsheet_id.into(),
            request_timeout: Duration::from_secs(30),
            modified_column: None,
        })
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Names the modification-time field.
    #[must_use]
    pub fn with_modified_column(mut self, column: impl Into<String>) -> Self {
        self.modified_column = Some(column.into());
        self
    }
}

/// Remote client for a spreadsheet values API.
pub struct SheetsRemote<C: HttpClient> {
    config: SheetsConfig,
    client: C,
    tokens: Arc<dyn TokenSource>,
    bearer: RwLock<Option<String>>,
    headers: RwLock<HashMap<String, Vec<String>>>,
}

impl<C: HttpClient> SheetsRemote<C> {
    /// Creates a client. Call `authenticate` before any data call.
    pub fn new(config: SheetsConfig, client: C, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            config,
            client,
            tokens,
            bearer: RwLock::new(None),
            headers: RwLock::new(HashMap::new()),
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &SheetsConfig {
        &self.config
    }

    fn url(&self, last_segment: &str, query: &[(&str, &str)]) -> RemoteResult<String> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::unavailable("base url cannot hold a path"))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.config.spreadsheet_id.as_str()])
            .push(last_segment);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url.into())
    }

    fn values_url(&self, range: &str, suffix: &str, query: &[(&str, &str)]) -> RemoteResult<String> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::unavailable("base url cannot hold a path"))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.config.spreadsheet_id.as_str(), "values"])
            .push(&format!("{range}{suffix}"));
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url.into())
    }

    fn send(&self, method: Method, url: String, body: Option<serde_json::Value>) -> RemoteResult<serde_json::Value> {
        let bearer = self
            .bearer
            .read()
            .clone()
            .ok_or_else(|| RemoteError::unauthorized("not authenticated"))?;
        let request = HttpRequest {
            method,
            url,
            bearer: Some(bearer),
            body,
            timeout: self.config.request_timeout,
        };

        let response = self.client.send(&request).map_err(|failure| {
            debug!(method = %request.method, url = %request.url, error = %failure, "request failed");
            match failure {
                HttpFailure::Timeout => RemoteError::unavailable("request timed out"),
                other => RemoteError::unavailable(other.to_string()),
            }
        })?;

        if !response.is_success() {
            return Err(status_error(response.status, &response.body));
        }
        if response.body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&response.body)
            .map_err(|e| RemoteError::unavailable(format!("malformed response: {e}")))
    }

    fn get_values(&self, range: &str) -> RemoteResult<Vec<Vec<Value>>> {
        let url = self.values_url(range, "", &[("valueRenderOption", "UNFORMATTED_VALUE")])?;
        let body = self.send(Method::Get, url, None)?;
        Ok(grid(&body))
    }

    fn header(&self, sheet: &str) -> RemoteResult<Vec<String>> {
        if let Some(header) = self.headers.read().get(sheet) {
            return Ok(header.clone());
        }
        let rows = self.get_values(&a1::header_range(sheet))?;
        let header = header_names(rows.first().map(Vec::as_slice).unwrap_or(&[]));
        if header.is_empty() {
            return Err(RemoteError::not_found(format!("sheet {sheet} has no header row")));
        }
        self.headers.write().insert(sheet.to_string(), header.clone());
        Ok(header)
    }

    fn fetch_row(&self, sheet: &str, row: u32, width: usize) -> RemoteResult<Option<Vec<Value>>> {
        let rows = self.get_values(&a1::row_range(sheet, row, width))?;
        Ok(rows
            .into_iter()
            .next()
            .map(|cells| pad(cells, width))
            .filter(|cells| !is_blank(cells)))
    }

    /// Reads the row and checks it still exists at the expected version.
    fn check_row(&self, sheet: &str, row: u32, width: usize, expected: Option<&str>) -> RemoteResult<Vec<Value>> {
        let current = self
            .fetch_row(sheet, row, width)?
            .ok_or_else(|| RemoteError::not_found(format!("row {row} of {sheet} is empty")))?;
        match expected {
            Some(expected) if row_version(&current) != expected => Err(RemoteError::conflict(format!(
                "row {row} of {sheet} changed since version {expected}"
            ))),
            _ => Ok(current),
        }
    }

    /// The modification column to stamp, unless the record sets it itself.
    fn stamp_column<'a>(&'a self, fields: &Record) -> Option<&'a str> {
        self.config
            .modified_column
            .as_deref()
            .filter(|c| !fields.get(*c).is_some_and(|v| !v.is_null()))
    }

    /// Whether writing `fields` leaves some header cell as it is.
    fn leaves_cells(&self, header: &[String], fields: &Record) -> bool {
        let stamp = self.stamp_column(fields);
        header
            .iter()
            .any(|name| stamp != Some(name.as_str()) && !fields.contains_key(name))
    }

    /// The JSON row to send and the cells the row holds afterwards.
    ///
    /// Cells the record does not carry go out as `null` and keep their value
    /// from `current`.
    fn row_write(
        &self,
        header: &[String],
        fields: &Record,
        current: Option<&[Value]>,
    ) -> (Vec<serde_json::Value>, Vec<Value>) {
        let stamp = self.stamp_column(fields);
        let mut wire = Vec::with_capacity(header.len());
        let mut cells = Vec::with_capacity(header.len());
        for (index, name) in header.iter().enumerate() {
            let written = if stamp == Some(name.as_str()) {
                Some(Value::Integer(chrono::Utc::now().timestamp_millis()))
            } else {
                fields.get(name).cloned()
            };
            match written {
                Some(value) => {
                    wire.push(cell_json(&value));
                    cells.push(value);
                }
                None => {
                    wire.push(serde_json::Value::Null);
                    cells.push(current.and_then(|c| c.get(index)).cloned().unwrap_or(Value::Null));
                }
            }
        }
        (wire, cells)
    }

    fn modified_at(&self, header: &[String], cells: &[Value]) -> Option<i64> {
        let column = self.config.modified_column.as_deref()?;
        let index = header.iter().position(|h| h == column)?;
        parse_modified(cells.get(index)?)
    }
}

impl<C: HttpClient> RemoteClient for SheetsRemote<C> {
    fn authenticate(&self) -> RemoteResult<()> {
        match self.tokens.fetch_token() {
            Some(token) => {
                *self.bearer.write() = Some(token);
                Ok(())
            }
            None => {
                *self.bearer.write() = None;
                Err(RemoteError::unauthorized("no credential available"))
            }
        }
    }

    fn read_collection(&self, collection: &str) -> RemoteResult<Vec<RemoteRecord>> {
        let rows = self.get_values(&a1::sheet_range(collection))?;
        let mut rows = rows.into_iter();
        let header = header_names(&rows.next().unwrap_or_default());
        if header.is_empty() {
            return Err(RemoteError::not_found(format!("sheet {collection} has no header row")));
        }
        self.headers
            .write()
            .insert(collection.to_string(), header.clone());

        let mut records = Vec::new();
        for (offset, cells) in rows.enumerate() {
            let cells = pad(cells, header.len());
            if is_blank(&cells) {
                continue;
            }
            let row_number = offset + 2;
            let fields: Record = header
                .iter()
                .cloned()
                .zip(cells.iter().cloned())
                .filter(|(name, _)| !name.is_empty())
                .collect();
            records.push(RemoteRecord {
                remote_id: row_number.to_string(),
                version: Some(row_version(&cells)),
                modified_at: self.modified_at(&header, &cells),
                fields,
            });
        }
        debug!(collection, records = records.len(), "sheet read");
        Ok(records)
    }

    fn append_row(&self, collection: &str, fields: &Record) -> RemoteResult<RemoteWrite> {
        let header = self.header(collection)?;
        let (wire, cells) = self.row_write(&header, fields, None);
        let url = self.values_url(
            &a1::sheet_range(collection),
            ":append",
            &[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")],
        )?;
        let body = self.send(Method::Post, url, Some(json!({ "values": [wire] })))?;

        let row = body
            .pointer("/updates/updatedRange")
            .and_then(serde_json::Value::as_str)
            .and_then(a1::first_row)
            .ok_or_else(|| RemoteError::unavailable("append response has no updated range"))?;
        Ok(RemoteWrite {
            remote_id: row.to_string(),
            version: Some(row_version(&cells)),
        })
    }

    fn update_row(
        &self,
        collection: &str,
        remote_id: &str,
        fields: &Record,
        expected_version: Option<&str>,
    ) -> RemoteResult<RemoteWrite> {
        let row = parse_row(collection, remote_id)?;
        let header = self.header(collection)?;
        let current = if expected_version.is_some() {
            Some(self.check_row(collection, row, header.len(), expected_version)?)
        } else if self.leaves_cells(&header, fields) {
            self.fetch_row(collection, row, header.len())?
        } else {
            None
        };

        let (wire, cells) = self.row_write(&header, fields, current.as_deref());
        let range = a1::row_range(collection, row, header.len());
        let url = self.values_url(&range, "", &[("valueInputOption", "RAW")])?;
        self.send(
            Method::Put,
            url,
            Some(json!({ "range": range, "majorDimension": "ROWS", "values": [wire] })),
        )?;
        Ok(RemoteWrite {
            remote_id: remote_id.to_string(),
            version: Some(row_version(&cells)),
        })
    }

    fn delete_row(&self, collection: &str, remote_id: &str, expected_version: Option<&str>) -> RemoteResult<()> {
        let row = parse_row(collection, remote_id)?;
        let header = self.header(collection)?;
        self.check_row(collection, row, header.len(), expected_version)?;

        let range = a1::row_range(collection, row, header.len());
        let url = self.values_url(&range, ":clear", &[])?;
        self.send(Method::Post, url, Some(json!({})))?;
        Ok(())
    }

    fn batch_update(&self, collection: &str, updates: &[RowUpdate]) -> RemoteResult<BatchOutcome> {
        let header = self.header(collection)?;

        // one read serves every version check and every merge
        let needs_read = updates
            .iter()
            .any(|u| u.expected_version.is_some() || self.leaves_cells(&header, &u.fields));
        let current: Option<Vec<Vec<Value>>> = if needs_read {
            Some(self.get_values(&a1::sheet_range(collection))?)
        } else {
            None
        };

        let mut results: Vec<Option<RemoteResult<RemoteWrite>>> = Vec::with_capacity(updates.len());
        let mut data = Vec::new();
        let mut pending = Vec::new();

        for (index, update) in updates.iter().enumerate() {
            let row = match parse_row(collection, &update.remote_id) {
                Ok(row) => row,
                Err(e) => {
                    results.push(Some(Err(e)));
                    continue;
                }
            };
            let existing = current.as_ref().and_then(|grid| {
                grid.get(row as usize - 1)
                    .cloned()
                    .map(|cells| pad(cells, header.len()))
                    .filter(|cells| !is_blank(cells))
            });
            if let Some(expected) = update.expected_version.as_deref() {
                match &existing {
                    None => {
                        results.push(Some(Err(RemoteError::not_found(format!(
                            "row {row} of {collection} is empty"
                        )))));
                        continue;
                    }
                    Some(cells) if row_version(cells) != expected => {
                        results.push(Some(Err(RemoteError::conflict(format!(
                            "row {row} of {collection} changed since version {expected}"
                        )))));
                        continue;
                    }
                    Some(_) => {}
                }
            }

            let (wire, cells) = self.row_write(&header, &update.fields, existing.as_deref());
            data.push(json!({
                "range": a1::row_range(collection, row, header.len()),
                "majorDimension": "ROWS",
                "values": [wire],
            }));
            pending.push((index, row_version(&cells)));
            results.push(None);
        }

        if !data.is_empty() {
            let url = self.url("values:batchUpdate", &[])?;
            let sent = self.send(
                Method::Post,
                url,
                Some(json!({ "valueInputOption": "RAW", "data": data })),
            );
            match sent {
                Ok(_) => {
                    for (index, version) in pending {
                        results[index] = Some(Ok(RemoteWrite {
                            remote_id: updates[index].remote_id.clone(),
                            version: Some(version),
                        }));
                    }
                }
                Err(e) if e.is_unauthorized() => return Err(e),
                Err(e) => {
                    warn!(collection, error = %e, rows = pending.len(), "batch update failed");
                    for (index, _) in pending {
                        results[index] = Some(Err(e.clone()));
                    }
                }
            }
        }

        Ok(BatchOutcome {
            results: results
                .into_iter()
                .map(|r| r.unwrap_or_else(|| Err(RemoteError::unavailable("update not sent"))))
                .collect(),
        })
    }

    fn probe_reachable(&self, timeout: Duration) -> bool {
        let Some(host) = self.config.base_url.host_str() else {
            return false;
        };
        let Some(port) = self.config.base_url.port_or_known_default() else {
            return false;
        };
        probe_tcp(host, port, timeout)
    }
}

/// Maps an HTTP error status onto the remote error kinds.
pub fn status_error(status: u16, body: &str) -> RemoteError {
    let mut detail: String = body.chars().take(200).collect();
    if detail.is_empty() {
        detail.push_str("no body");
    }
    let message = format!("HTTP {status}: {detail}");
    match status {
        401 | 403 => RemoteError::unauthorized(message),
        404 => RemoteError::not_found(message),
        409 | 412 => RemoteError::conflict(message),
        _ => RemoteError::unavailable(message),
    }
}

fn parse_row(collection: &str, remote_id: &str) -> RemoteResult<u32> {
    remote_id
        .parse::<u32>()
        .ok()
        .filter(|row| *row >= 2)
        .ok_or_else(|| RemoteError::not_found(format!("{remote_id} is not a data row of {collection}")))
}

fn grid(body: &serde_json::Value) -> Vec<Vec<Value>> {
    body.get("values")
        .and_then(serde_json::Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| {
                            cells
                                .iter()
                                .map(|c| value_from_json(c).unwrap_or(Value::Null))
                                .collect()
                        })
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

fn header_names(cells: &[Value]) -> Vec<String> {
    let mut names: Vec<String> = cells.iter().map(|c| c.to_cell_text().trim().to_string()).collect();
    while names.last().is_some_and(String::is_empty) {
        names.pop();
    }
    names
}

fn pad(mut cells: Vec<Value>, width: usize) -> Vec<Value> {
    cells.resize(width, Value::Null);
    cells
}

fn is_blank(cells: &[Value]) -> bool {
    cells.iter().all(|c| c.to_cell_text().trim().is_empty())
}

fn cell_json(value: &Value) -> serde_json::Value {
    match value {
        // an empty string clears the cell; null would leave it untouched
        Value::Null => serde_json::Value::String(String::new()),
        other => value_to_json(other),
    }
}

/// Content hash of a row, as shown in the sheet.
pub fn row_version(cells: &[Value]) -> String {
    let mut hasher = Sha256::new();
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(cell.to_cell_text().as_bytes());
    }
    hasher.finalize()[..8].iter().map(|b| format!("{b:02x}")).collect()
}

#[allow(clippy::cast_possible_truncation)]
fn parse_modified(cell: &Value) -> Option<i64> {
    match cell {
        Value::Integer(ms) => Some(*ms),
        Value::Real(ms) if ms.is_finite() => Some(*ms as i64),
        Value::Text(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                chrono::DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|t| t.timestamp_millis())
            })
        }
        _ => None,
    }
}

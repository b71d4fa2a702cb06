//! Typed reqwest wrapper for the parts of Google Sheets and Drive the daily
//! report needs.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{EtlError, Result};
use crate::google_auth::{GoogleAuth, ServiceAccountKey};
use crate::models::AggregateSnapshot;

const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
const REPORT_ROWS: i64 = 6;
const LABEL_COLUMN_WIDTH: u32 = 400;
const VALUE_COLUMN_WIDTH: u32 = 100;

/// Label/value pairs written to `A1:B6`, top to bottom.
pub fn report_rows(snapshot: &AggregateSnapshot) -> [(&'static str, u64); 6] {
    [
        ("Submitted attempts", snapshot.attempts),
        ("Successful attempts", snapshot.success),
        ("Unique users", snapshot.count_users),
        ("Submitted in the morning (04:00-11:59)", snapshot.time_of_day.morning),
        ("Submitted in the afternoon (12:00-17:59)", snapshot.time_of_day.afternoon),
        ("Submitted in the evening (18:00-23:59)", snapshot.time_of_day.evening),
    ]
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Debug, Deserialize)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    pub sheet_id: i64,
    pub title: String,
}

pub struct SheetsClient {
    http: reqwest::Client,
    sheets_base: String,
    drive_base: String,
    auth_token: String,
}

impl SheetsClient {
    pub fn new(http: reqwest::Client, auth_token: &str) -> Self {
        Self {
            http,
            sheets_base: "https://sheets.googleapis.com".to_string(),
            drive_base: "https://www.googleapis.com".to_string(),
            auth_token: auth_token.to_string(),
        }
    }

    /// Override the API hosts (for testing with wiremock).
    pub fn with_base_urls(mut self, sheets: &str, drive: &str) -> Self {
        self.sheets_base = sheets.trim_end_matches('/').to_string();
        self.drive_base = drive.trim_end_matches('/').to_string();
        self
    }

    /// Looks up a spreadsheet the service account can see by its exact name.
    pub async fn find_spreadsheet(&self, name: &str) -> Result<String> {
        let query = format!(
            "name = '{}' and mimeType = '{SPREADSHEET_MIME}' and trashed = false",
            name.replace('\\', "\\\\").replace('\'', "\\'")
        );
        let resp = self
            .http
            .get(format!("{}/drive/v3/files", self.drive_base))
            .bearer_auth(&self.auth_token)
            .query(&[("q", query.as_str()), ("fields", "files(id,name)")])
            .send()
            .await?;
        let list: FileList = read_json(resp, "find spreadsheet").await?;

        list.files
            .into_iter()
            .next()
            .map(|f| f.id)
            .ok_or_else(|| EtlError::Sheets(format!("spreadsheet {name:?} not found or not shared")))
    }

    pub async fn first_sheet(&self, spreadsheet_id: &str) -> Result<SheetProperties> {
        let resp = self
            .http
            .get(format!("{}/v4/spreadsheets/{spreadsheet_id}", self.sheets_base))
            .bearer_auth(&self.auth_token)
            .query(&[("fields", "sheets.properties(sheetId,title)")])
            .send()
            .await?;
        let spreadsheet: Spreadsheet = read_json(resp, "get spreadsheet").await?;

        spreadsheet
            .sheets
            .into_iter()
            .next()
            .map(|s| s.properties)
            .ok_or_else(|| EtlError::Sheets(format!("spreadsheet {spreadsheet_id} has no sheets")))
    }

    /// Applies the static report layout: white background, black 12pt text,
    /// labels left aligned, values centered, fixed column widths.
    pub async fn apply_format(&self, spreadsheet_id: &str, sheet_id: i64) -> Result<()> {
        let body = json!({ "requests": format_requests(sheet_id) });
        let resp = self
            .http
            .post(format!(
                "{}/v4/spreadsheets/{spreadsheet_id}:batchUpdate",
                self.sheets_base
            ))
            .bearer_auth(&self.auth_token)
            .json(&body)
            .send()
            .await?;
        let _: Value = read_json(resp, "format report").await?;
        Ok(())
    }

    /// Overwrites `A1:B6` with the report rows.
    pub async fn write_values(
        &self,
        spreadsheet_id: &str,
        sheet_title: &str,
        snapshot: &AggregateSnapshot,
    ) -> Result<()> {
        let range = format!("{}!A1:B{REPORT_ROWS}", quote_sheet_title(sheet_title));
        let mut url = reqwest::Url::parse(&format!(
            "{}/v4/spreadsheets/{spreadsheet_id}/values",
            self.sheets_base
        ))
        .map_err(|e| EtlError::Config(format!("invalid Sheets API URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| EtlError::Config("Sheets API URL cannot be a base".into()))?
            .push(&range);

        let values: Vec<Value> = report_rows(snapshot)
            .iter()
            .map(|(label, value)| json!([label, value]))
            .collect();
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": values,
        });

        let resp = self
            .http
            .put(url)
            .bearer_auth(&self.auth_token)
            .query(&[("valueInputOption", "RAW")])
            .json(&body)
            .send()
            .await?;
        let _: Value = read_json(resp, "write report values").await?;
        Ok(())
    }

    /// Finds the report document and rewrites its first sheet.
    pub async fn publish(&self, spreadsheet_name: &str, snapshot: &AggregateSnapshot) -> Result<()> {
        let spreadsheet_id = self.find_spreadsheet(spreadsheet_name).await?;
        let sheet = self.first_sheet(&spreadsheet_id).await?;
        self.apply_format(&spreadsheet_id, sheet.sheet_id).await?;
        self.write_values(&spreadsheet_id, &sheet.title, snapshot).await?;
        tracing::info!(
            spreadsheet = spreadsheet_name,
            sheet = %sheet.title,
            "report published"
        );
        Ok(())
    }
}

/// Authenticates with the configured service account and publishes the report.
pub async fn publish_report(config: &Config, snapshot: &AggregateSnapshot) -> Result<()> {
    let key = ServiceAccountKey::from_file(&config.credentials_file)?;
    let http = reqwest::Client::builder().timeout(config.http_timeout).build()?;
    let token = GoogleAuth::new(http.clone(), key).fetch_token().await?;

    SheetsClient::new(http, &token)
        .with_base_urls(&config.sheets_api_url, &config.drive_api_url)
        .publish(&config.spreadsheet_name, snapshot)
        .await
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response, action: &str) -> Result<T> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(EtlError::Sheets(format!("{action} failed ({status}): {body}")));
    }

    resp.json::<T>()
        .await
        .map_err(|e| EtlError::Sheets(format!("{action} parse failed: {e}")))
}

fn quote_sheet_title(title: &str) -> String {
    if title.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        title.to_string()
    } else {
        format!("'{}'", title.replace('\'', "''"))
    }
}

fn format_requests(sheet_id: i64) -> Vec<Value> {
    let column_format = |column: i64, alignment: &str| {
        json!({
            "repeatCell": {
                "range": {
                    "sheetId": sheet_id,
                    "startRowIndex": 0,
                    "endRowIndex": REPORT_ROWS,
                    "startColumnIndex": column,
                    "endColumnIndex": column + 1,
                },
                "cell": {
                    "userEnteredFormat": {
                        "backgroundColor": {"red": 1.0, "green": 1.0, "blue": 1.0},
                        "horizontalAlignment": alignment,
                        "textFormat": {
                            "foregroundColor": {"red": 0.0, "green": 0.0, "blue": 0.0},
                            "fontSize": 12,
                            "bold": false,
                        },
                    },
                },
                "fields": "userEnteredFormat(backgroundColor,horizontalAlignment,textFormat)",
            }
        })
    };

    vec![
        column_format(0, "LEFT"),
        column_format(1, "CENTER"),
        json!({
            "updateDimensionProperties": {
                "range": {"sheetId": sheet_id, "dimension": "COLUMNS", "startIndex": 0, "endIndex": 1},
                "properties": {"pixelSize": LABEL_COLUMN_WIDTH},
                "fields": "pixelSize",
            }
        }),
        // Open-ended range: every column from B onwards.
        json!({
            "updateDimensionProperties": {
                "range": {"sheetId": sheet_id, "dimension": "COLUMNS", "startIndex": 1},
                "properties": {"pixelSize": VALUE_COLUMN_WIDTH},
                "fields": "pixelSize",
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeOfDay;
    use wiremock::matchers::{bearer_token, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn snapshot() -> AggregateSnapshot {
        AggregateSnapshot {
            attempts: 120,
            success: 45,
            count_users: 30,
            time_of_day: TimeOfDay {
                morning: 50,
                afternoon: 40,
                evening: 25,
            },
        }
    }

    async fn setup() -> (MockServer, SheetsClient) {
        let server = MockServer::start().await;
        let client = SheetsClient::new(reqwest::Client::new(), "test-token")
            .with_base_urls(&server.uri(), &server.uri());
        (server, client)
    }

    async fn mount_report_api(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(bearer_token("test-token"))
            .and(query_param(
                "q",
                "name = 'Report' and mimeType = 'application/vnd.google-apps.spreadsheet' and trashed = false",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{"id": "sheet-123", "name": "Report"}]
            })))
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sheets": [
                    {"properties": {"sheetId": 0, "title": "Sheet1"}},
                    {"properties": {"sheetId": 7, "title": "Archive"}}
                ]
            })))
            .mount(server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet-123:batchUpdate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"replies": []})))
            .mount(server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/v4/spreadsheets/sheet-123/values/Sheet1!A1:B6"))
            .and(query_param("valueInputOption", "RAW"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"updatedCells": 12})))
            .mount(server)
            .await;
    }

    #[test]
    fn rows_follow_fixed_order() {
        let rows = report_rows(&snapshot());
        let values: Vec<u64> = rows.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, [120, 45, 30, 50, 40, 25]);
    }

    #[test]
    fn format_covers_both_columns_and_widths() {
        let requests = format_requests(0);
        assert_eq!(requests.len(), 4);
        assert_eq!(
            requests[0]["repeatCell"]["cell"]["userEnteredFormat"]["horizontalAlignment"],
            "LEFT"
        );
        assert_eq!(
            requests[1]["repeatCell"]["cell"]["userEnteredFormat"]["horizontalAlignment"],
            "CENTER"
        );
        assert_eq!(requests[1]["repeatCell"]["range"]["endRowIndex"], 6);
        assert_eq!(requests[2]["updateDimensionProperties"]["properties"]["pixelSize"], 400);
        assert!(requests[3]["updateDimensionProperties"]["range"]
            .get("endIndex")
            .is_none());
    }

    #[test]
    fn sheet_titles_are_quoted_when_needed() {
        assert_eq!(quote_sheet_title("Sheet1"), "Sheet1");
        assert_eq!(quote_sheet_title("Daily report"), "'Daily report'");
        assert_eq!(quote_sheet_title("It's"), "'It''s'");
    }

    #[tokio::test]
    async fn publish_writes_six_rows_to_first_sheet() {
        let (server, client) = setup().await;
        mount_report_api(&server).await;

        client.publish("Report", &snapshot()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let put = requests
            .iter()
            .find(|r| r.method.as_str() == "PUT")
            .expect("values update sent");
        let body: Value = serde_json::from_slice(&put.body).unwrap();
        assert_eq!(body["range"], "Sheet1!A1:B6");
        assert_eq!(body["values"].as_array().unwrap().len(), 6);
        assert_eq!(body["values"][0], json!(["Submitted attempts", 120]));
        assert_eq!(body["values"][5][1], 25);
    }

    #[tokio::test]
    async fn publishing_twice_writes_the_same_cells() {
        let (server, client) = setup().await;
        mount_report_api(&server).await;

        client.publish("Report", &snapshot()).await.unwrap();
        client.publish("Report", &snapshot()).await.unwrap();

        let puts: Vec<(String, Vec<u8>)> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "PUT")
            .map(|r| (r.url.path().to_string(), r.body))
            .collect();
        assert_eq!(puts.len(), 2);
        assert_eq!(puts[0], puts[1]);
    }

    #[tokio::test]
    async fn missing_spreadsheet_is_reported() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"files": []})))
            .mount(&server)
            .await;

        let err = client.publish("Report", &snapshot()).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn api_errors_surface_status_and_body() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("insufficient permissions"))
            .mount(&server)
            .await;

        let err = client.find_spreadsheet("Report").await.unwrap_err();
        assert!(matches!(err, EtlError::Sheets(_)));
        assert!(err.to_string().contains("403"));
    }
}

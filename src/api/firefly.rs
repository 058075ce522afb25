//! `Upstream` backed by the Firefly-III REST API.

use crate::api::Upstream;
use crate::cache::TransactionsKey;
use crate::error::{CoreResult, Error};
use crate::model::{
    Account, AccountType, Category, CategoryTotal, InsightKind, NewTransaction, Transaction,
    TransactionGroup, TransactionType,
};
use crate::{utils, Config, Result};
use anyhow::Context;
use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

const CATEGORY_AUTOCOMPLETE_LIMIT: &str = "1000";

/// Talks to a Firefly-III server with a personal access token.
#[derive(Debug, Clone)]
pub struct FireflyClient {
    client: Client,
    base: Url,
    zone: Tz,
}

impl FireflyClient {
    /// Builds a client from the configured server URL, token file, time zone and request timeout.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let token_path = config.token_path();
        let token = utils::read(&token_path)
            .await
            .context("Unable to read the upstream access token")?;
        Self::new(
            config.upstream_url().clone(),
            token.trim(),
            config.time_zone(),
            config.request_timeout(),
        )
    }

    pub fn new(base: Url, token: &str, zone: Tz, timeout: std::time::Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("The upstream access token contains invalid characters")?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Unable to build the HTTP client")?;
        Ok(Self { client, base, zone })
    }

    fn url(&self, operation: &str, path: &str) -> CoreResult<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::unavailable(operation, format!("bad url for '{path}': {e}")))
    }

    fn day(&self, instant: DateTime<Utc>) -> String {
        instant.with_timezone(&self.zone).format("%Y-%m-%d").to_string()
    }

    async fn get<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> CoreResult<T> {
        let url = self.url(operation, path)?;
        send(operation, self.client.get(url).query(query)).await
    }

    /// Follows `meta.pagination` until every page of a list endpoint has been read.
    async fn get_all<A: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> CoreResult<Vec<Resource<A>>> {
        let mut resources = Vec::new();
        let mut page = 1u32;
        loop {
            let mut paged = query.to_vec();
            paged.push(("page", page.to_string()));
            let list: Envelope<Vec<Resource<A>>> = self.get(operation, path, &paged).await?;
            resources.extend(list.data);
            let total_pages = list
                .meta
                .and_then(|m| m.pagination)
                .map(|p| p.total_pages)
                .unwrap_or(1);
            if page >= total_pages {
                break;
            }
            page += 1;
        }
        trace!("{operation} read {page} page(s)");
        Ok(resources)
    }
}

/// Sends the request and decodes a JSON body, mapping each failure to its own error kind.
async fn send<T: DeserializeOwned>(operation: &str, request: RequestBuilder) -> CoreResult<T> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::unavailable(operation, e.to_string()))?;
    let status = response.status();
    trace!("{operation} returned {status}");
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::UpstreamBadStatus {
            operation: operation.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::unavailable(operation, e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::malformed(operation, e.to_string()))
}

#[async_trait::async_trait]
impl Upstream for FireflyClient {
    async fn fetch_accounts(&self) -> CoreResult<Vec<Account>> {
        let accounts: Vec<Account> = self
            .get_all::<AccountAttributes>(
                "fetch_accounts",
                "api/v1/accounts",
                &[("type", "all".to_string())],
            )
            .await?
            .into_iter()
            .filter(|r| r.attributes.active)
            .map(Resource::into_account)
            .collect();
        debug!("Fetched {} active accounts", accounts.len());
        Ok(accounts)
    }

    async fn fetch_categories(&self) -> CoreResult<Vec<Category>> {
        let rows: Vec<AutocompleteCategory> = self
            .get(
                "fetch_categories",
                "api/v1/autocomplete/categories",
                &[("limit", CATEGORY_AUTOCOMPLETE_LIMIT.to_string())],
            )
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Category::new(
                    parse_id("fetch_categories", &row.id)?,
                    row.name,
                ))
            })
            .collect()
    }

    async fn fetch_category_totals(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<CategoryTotal>> {
        let operation = "fetch_category_totals";
        let resources = self
            .get_all::<CategoryAttributes>(
                operation,
                "api/v1/categories",
                &[("start", self.day(start)), ("end", self.day(end))],
            )
            .await?;
        let mut totals = Vec::new();
        for resource in resources {
            if resource.attributes.spent.is_empty() && resource.attributes.earned.is_empty() {
                continue;
            }
            totals.push(resource.into_total(operation, start, end)?);
        }
        Ok(totals)
    }

    async fn fetch_category_total(
        &self,
        category_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<CategoryTotal>> {
        let operation = "fetch_category_total";
        let one: Envelope<Resource<CategoryAttributes>> = self
            .get(
                operation,
                &format!("api/v1/categories/{category_id}"),
                &[("start", self.day(start)), ("end", self.day(end))],
            )
            .await?;
        Ok(vec![one.data.into_total(operation, start, end)?])
    }

    async fn fetch_insight_total(
        &self,
        kind: InsightKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Decimal> {
        let operation = "fetch_insight_total";
        let rows: Vec<InsightRow> = self
            .get(
                operation,
                &format!("api/v1/insight/{kind}/total"),
                &[("start", self.day(start)), ("end", self.day(end))],
            )
            .await?;
        match rows.as_slice() {
            [row] => Ok(row.difference),
            _ => Err(Error::UpstreamShapeMismatch {
                what: format!("{kind} insight total"),
                expected: 1,
                actual: rows.len(),
            }),
        }
    }

    async fn fetch_transactions(&self, key: &TransactionsKey) -> CoreResult<Vec<TransactionGroup>> {
        let operation = "fetch_transactions";
        let mut query = vec![("page", key.page.to_string())];
        if let Some(start) = key.start {
            query.push(("start", start.to_string()));
        }
        if let Some(end) = key.end {
            query.push(("end", end.to_string()));
        }
        let list: Envelope<Vec<Resource<GroupAttributes>>> =
            self.get(operation, "api/v1/transactions", &query).await?;
        list.data
            .into_iter()
            .map(|r| r.into_group(operation))
            .collect()
    }

    async fn create_transaction(
        &self,
        transaction: NewTransaction,
        transaction_type: TransactionType,
    ) -> CoreResult<TransactionGroup> {
        let operation = "create_transaction";
        let body = StoreGroup {
            transactions: vec![SplitBody::from(transaction.into_transaction(transaction_type))],
        };
        let url = self.url(operation, "api/v1/transactions")?;
        let created: Envelope<Resource<GroupAttributes>> =
            send(operation, self.client.post(url).json(&body)).await?;
        created.data.into_group(operation)
    }
}

fn parse_id(operation: &str, id: &str) -> CoreResult<i64> {
    id.parse()
        .map_err(|_| Error::malformed(operation, format!("'{id}' is not a numeric id")))
}

// Wire shapes. Firefly wraps everything in `{"data": ..., "meta": ...}` and sends amounts and
// ids as strings.

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct Resource<A> {
    id: String,
    attributes: A,
}

#[derive(Debug, Deserialize)]
struct AccountAttributes {
    name: String,
    #[serde(rename = "type")]
    account_type: AccountType,
    #[serde(default)]
    current_balance: Option<Decimal>,
    #[serde(default)]
    include_net_worth: bool,
    #[serde(default)]
    active: bool,
}

impl Resource<AccountAttributes> {
    fn into_account(self) -> Account {
        Account {
            id: self.id,
            name: self.attributes.name,
            account_type: self.attributes.account_type,
            current_balance: self.attributes.current_balance.unwrap_or_default(),
            include_in_net_worth: self.attributes.include_net_worth,
            active: self.attributes.active,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AutocompleteCategory {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CategoryAttributes {
    name: String,
    #[serde(default)]
    spent: Vec<Sum>,
    #[serde(default)]
    earned: Vec<Sum>,
}

/// One currency's sum. Budgets are single-currency, so sums are added together.
#[derive(Debug, Deserialize)]
struct Sum {
    sum: Decimal,
}

impl Resource<CategoryAttributes> {
    fn into_total(
        self,
        operation: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<CategoryTotal> {
        Ok(CategoryTotal {
            category: Category::new(parse_id(operation, &self.id)?, self.attributes.name),
            spent: self.attributes.spent.iter().map(|s| s.sum).sum(),
            earned: self.attributes.earned.iter().map(|s| s.sum).sum(),
            start,
            end,
        })
    }
}

/// One currency's row of `insight/{income,expense}/total`.
#[derive(Debug, Deserialize)]
struct InsightRow {
    difference: Decimal,
}

#[derive(Debug, Deserialize)]
struct GroupAttributes {
    #[serde(default)]
    group_title: Option<String>,
    transactions: Vec<Split>,
}

#[derive(Debug, Deserialize)]
struct Split {
    #[serde(rename = "type")]
    transaction_type: TransactionType,
    date: DateTime<FixedOffset>,
    amount: Decimal,
    description: String,
    #[serde(default)]
    category_id: Option<String>,
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    source_name: Option<String>,
    #[serde(default)]
    destination_id: Option<String>,
    #[serde(default)]
    destination_name: Option<String>,
}

impl Resource<GroupAttributes> {
    fn into_group(self, operation: &str) -> CoreResult<TransactionGroup> {
        let splits = self
            .attributes
            .transactions
            .into_iter()
            .map(|split| {
                let category_id = split
                    .category_id
                    .as_deref()
                    .map(|id| parse_id(operation, id))
                    .transpose()?;
                Ok(Transaction {
                    transaction_type: split.transaction_type,
                    date: split.date,
                    amount: split.amount,
                    description: split.description,
                    category_id,
                    source_id: split.source_id,
                    source_name: split.source_name,
                    destination_id: split.destination_id,
                    destination_name: split.destination_name,
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;
        let title = self
            .attributes
            .group_title
            .or_else(|| splits.first().map(|s| s.description.clone()))
            .unwrap_or_default();
        Ok(TransactionGroup {
            id: self.id,
            title,
            splits,
        })
    }
}

#[derive(Debug, Serialize)]
struct StoreGroup {
    transactions: Vec<SplitBody>,
}

#[derive(Debug, Serialize)]
struct SplitBody {
    #[serde(rename = "type")]
    transaction_type: TransactionType,
    date: String,
    amount: String,
    description: String,
    category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination_name: Option<String>,
}

impl From<Transaction> for SplitBody {
    fn from(t: Transaction) -> Self {
        Self {
            transaction_type: t.transaction_type,
            date: t.date.to_rfc3339(),
            amount: t.amount.to_string(),
            description: t.description,
            category_id: t.category_id.map(|id| id.to_string()),
            source_id: t.source_id,
            source_name: t.source_name,
            destination_id: t.destination_id,
            destination_name: t.destination_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `pages` as JSON on a local port. The body is picked by the `page` query parameter,
    /// and requests without one get the first body.
    async fn serve(pages: Vec<&'static str>) -> FireflyClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let pages = pages.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&request);
                    let target = request.split(' ').nth(1).unwrap_or_default();
                    let page: usize = target
                        .split(['?', '&'])
                        .find_map(|p| p.strip_prefix("page="))
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(1);
                    let body = pages.get(page.saturating_sub(1)).copied().unwrap_or("[]");
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        FireflyClient::new(
            Url::parse(&format!("http://{addr}/")).unwrap(),
            "token",
            chrono_tz::America::Toronto,
            std::time::Duration::from_secs(5),
        )
        .unwrap()
    }

    fn year_2020() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2020, 1, 1, 5, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2021, 1, 1, 4, 59, 59).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_category_totals_read_every_page() {
        let client = serve(vec![
            r#"{"data": [{"id": "1", "attributes": {"name": "Groceries",
                "spent": [{"sum": "-10.00"}], "earned": []}},
                {"id": "3", "attributes": {"name": "Unused", "spent": [], "earned": []}}],
               "meta": {"pagination": {"total_pages": 2}}}"#,
            r#"{"data": [{"id": "2", "attributes": {"name": "Rent",
                "spent": [{"sum": "-1500.00"}], "earned": []}}],
               "meta": {"pagination": {"total_pages": 2}}}"#,
        ])
        .await;
        let (start, end) = year_2020();
        let totals = client.fetch_category_totals(start, end).await.unwrap();
        let ids: Vec<i64> = totals.iter().map(|t| t.category.id).collect();
        assert_eq!(ids, [1, 2]);
        assert_eq!(totals[1].spent, dec!(-1500.00));
    }

    #[tokio::test]
    async fn test_accounts_read_every_page() {
        let client = serve(vec![
            r#"{"data": [{"id": "1", "attributes": {"name": "Checking", "type": "asset",
                "current_balance": "10.00", "include_net_worth": true, "active": true}}],
               "meta": {"pagination": {"total_pages": 2}}}"#,
            r#"{"data": [{"id": "2", "attributes": {"name": "Savings", "type": "asset",
                "current_balance": "20.00", "include_net_worth": true, "active": true}}],
               "meta": {"pagination": {"total_pages": 2}}}"#,
        ])
        .await;
        let accounts = client.fetch_accounts().await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[1].name, "Savings");
    }

    #[tokio::test]
    async fn test_insight_total() {
        let (start, end) = year_2020();
        let client = serve(vec![r#"[{"difference": "-1234.50", "currency_id": "1"}]"#]).await;
        let total = client
            .fetch_insight_total(InsightKind::Expense, start, end)
            .await
            .unwrap();
        assert_eq!(total, dec!(-1234.50));

        let client = serve(vec![r#"[{"difference": "1"}, {"difference": "2"}]"#]).await;
        let err = client
            .fetch_insight_total(InsightKind::Income, start, end)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::UpstreamShapeMismatch {
                what: "income insight total".into(),
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn test_decode_account_list() {
        let json = r#"{
            "data": [
                {"id": "1", "attributes": {"name": "Checking", "type": "asset",
                    "current_balance": "1520.33", "include_net_worth": true, "active": true}},
                {"id": "2", "attributes": {"name": "Old Card", "type": "liabilities",
                    "current_balance": "-10.00", "include_net_worth": true, "active": false}}
            ],
            "meta": {"pagination": {"total": 2, "current_page": 1, "total_pages": 1}}
        }"#;
        let list: Envelope<Vec<Resource<AccountAttributes>>> = serde_json::from_str(json).unwrap();
        assert_eq!(list.meta.unwrap().pagination.unwrap().total_pages, 1);
        let accounts: Vec<Account> = list.data.into_iter().map(Resource::into_account).collect();
        assert_eq!(accounts[0].current_balance, dec!(1520.33));
        assert!(accounts[0].is_asset());
        assert_eq!(accounts[1].account_type, AccountType::Other);
    }

    #[test]
    fn test_decode_category_total_adds_currencies() {
        let json = r#"{"data": {"id": "4", "attributes": {"name": "Groceries",
            "spent": [{"sum": "-200.80"}, {"sum": "-37.00"}],
            "earned": [{"sum": "54.23"}]}}}"#;
        let one: Envelope<Resource<CategoryAttributes>> = serde_json::from_str(json).unwrap();
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 5, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2021, 1, 1, 4, 59, 59).unwrap();
        let total = one.data.into_total("test", start, end).unwrap();
        assert_eq!(total.category, Category::new(4, "Groceries"));
        assert_eq!(total.spent, dec!(-237.80));
        assert_eq!(total.net(), dec!(-183.57));
    }

    #[test]
    fn test_non_numeric_id_is_malformed() {
        let err = parse_id("fetch_categories", "abc").unwrap_err();
        assert!(matches!(err, Error::UpstreamMalformed { .. }));
    }

    #[test]
    fn test_decode_transaction_group() {
        let json = r#"{"data": [{"id": "77", "attributes": {"group_title": null, "transactions": [
            {"type": "withdrawal", "date": "2024-03-05T12:30:00-05:00", "amount": "12.50",
             "description": "Coffee", "category_id": "3", "source_id": "1",
             "source_name": "Checking", "destination_id": "9", "destination_name": "Cafe"}]}}]}"#;
        let list: Envelope<Vec<Resource<GroupAttributes>>> = serde_json::from_str(json).unwrap();
        let group = list
            .data
            .into_iter()
            .next()
            .unwrap()
            .into_group("test")
            .unwrap();
        assert_eq!(group.title, "Coffee");
        assert_eq!(group.splits[0].category_id, Some(3));
        assert_eq!(group.splits[0].transaction_type, TransactionType::Withdrawal);
    }

    #[test]
    fn test_day_uses_configured_zone() {
        let client = FireflyClient::new(
            Url::parse("http://localhost:8080/").unwrap(),
            "token",
            chrono_tz::America::Toronto,
            std::time::Duration::from_secs(1),
        )
        .unwrap();
        // 03:00 UTC on the 1st is still the 31st in Toronto.
        let instant = Utc.with_ymd_and_hms(2024, 2, 1, 3, 0, 0).unwrap();
        assert_eq!(client.day(instant), "2024-01-31");
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let client = FireflyClient::new(
            Url::parse("http://127.0.0.1:9/").unwrap(),
            "token",
            chrono_tz::UTC,
            std::time::Duration::from_secs(2),
        )
        .unwrap();
        let err = client.fetch_categories().await.unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable { .. }), "{err:?}");
    }
}

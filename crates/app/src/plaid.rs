//! Plaid `/transactions/sync` and public token exchange client.

use chrono::NaiveDate;
use ledger::{
    AccessCredential, EntryDetails, ItemAccess, LedgerError, Location, RemoteEntry, RemovedEntry,
    ResultLedger, SyncPage, TransactionSource,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::settings;

pub struct PlaidSource {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    secret: String,
}

#[derive(Serialize)]
struct SyncRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
    options: SyncOptions,
}

#[derive(Serialize)]
struct SyncOptions {
    include_personal_finance_category: bool,
}

#[derive(Serialize)]
struct ExchangeRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    public_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExchangeResponse {
    access_token: String,
    item_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SyncResponse {
    #[serde(default)]
    added: Vec<PlaidTransaction>,
    #[serde(default)]
    modified: Vec<PlaidTransaction>,
    #[serde(default)]
    removed: Vec<PlaidRemoved>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct PlaidTransaction {
    account_id: String,
    transaction_id: String,
    amount: f64,
    date: NaiveDate,
    authorized_date: Option<NaiveDate>,
    name: Option<String>,
    merchant_name: Option<String>,
    check_number: Option<String>,
    logo_url: Option<String>,
    location: Option<PlaidLocation>,
    personal_finance_category: Option<PlaidCategory>,
}

#[derive(Debug, Deserialize)]
struct PlaidLocation {
    address: Option<String>,
    city: Option<String>,
    region: Option<String>,
    postal_code: Option<String>,
    country: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    store_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaidCategory {
    detailed: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaidRemoved {
    account_id: String,
    transaction_id: String,
}

#[derive(Debug, Deserialize)]
struct PlaidError {
    error_code: Option<String>,
}

impl PlaidSource {
    pub fn new(settings: &settings::Plaid) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: settings.environment.base_url().to_string(),
            client_id: settings.client_id.clone(),
            secret: settings.secret.clone(),
        }
    }
}

impl PlaidSource {
    async fn post<B, T>(&self, path: &str, body: &B) -> ResultLedger<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let code = response
                .json::<PlaidError>()
                .await
                .ok()
                .and_then(|e| e.error_code)
                .unwrap_or_else(|| "unknown".to_string());
            return Err(LedgerError::Transport(format!(
                "plaid {path} returned {status}: {code}"
            )));
        }

        response.json::<T>().await.map_err(transport)
    }
}

impl TransactionSource for PlaidSource {
    async fn fetch_page(
        &self,
        credential: &AccessCredential,
        cursor: Option<&str>,
    ) -> ResultLedger<SyncPage> {
        let body = SyncRequest {
            client_id: &self.client_id,
            secret: &self.secret,
            access_token: credential.expose(),
            cursor,
            options: SyncOptions {
                include_personal_finance_category: true,
            },
        };

        let page: SyncResponse = self.post("/transactions/sync", &body).await?;
        tracing::debug!(
            added = page.added.len(),
            modified = page.modified.len(),
            removed = page.removed.len(),
            has_more = page.has_more,
            "fetched plaid page"
        );
        Ok(into_page(page))
    }

    async fn exchange_token(&self, public_token: &str) -> ResultLedger<ItemAccess> {
        let body = ExchangeRequest {
            client_id: &self.client_id,
            secret: &self.secret,
            public_token,
        };
        let response: ExchangeResponse = self.post("/item/public_token/exchange", &body).await?;
        Ok(into_access(response))
    }
}

fn transport(err: reqwest::Error) -> LedgerError {
    LedgerError::Transport(err.without_url().to_string())
}

pub(crate) fn into_page(response: SyncResponse) -> SyncPage {
    SyncPage {
        added: response.added.into_iter().map(into_remote).collect(),
        modified: response.modified.into_iter().map(into_remote).collect(),
        removed: response
            .removed
            .into_iter()
            .map(|r| RemovedEntry {
                external_account_id: r.account_id,
                source_id: r.transaction_id,
            })
            .collect(),
        has_more: response.has_more,
        next_cursor: response.next_cursor,
    }
}

pub(crate) fn into_access(response: ExchangeResponse) -> ItemAccess {
    ItemAccess {
        item_id: response.item_id,
        access_token: AccessCredential::new(response.access_token),
    }
}

/// Plaid reports outflows as positive major units.
fn amount_minor(amount: f64) -> i64 {
    -(amount * 100.0).round() as i64
}

fn into_remote(trx: PlaidTransaction) -> RemoteEntry {
    let location = trx.location.map(|l| Location {
        lat: l.lat,
        lon: l.lon,
        address: l.address,
        city: l.city,
        region: l.region,
        postal_code: l.postal_code,
        country: l.country,
        store_number: l.store_number,
    });

    RemoteEntry {
        external_account_id: trx.account_id,
        source_id: trx.transaction_id,
        tx_date: trx.authorized_date.unwrap_or(trx.date),
        amount_minor: amount_minor(trx.amount),
        details: EntryDetails {
            payee: trx.merchant_name.or(trx.name),
            memo: trx
                .check_number
                .filter(|n| !n.is_empty())
                .map(|n| format!("Check number: {n}")),
            category: trx.personal_finance_category.and_then(|c| c.detailed),
            location: location.filter(|l| *l != Location::default()),
            icon: trx.logo_url,
            tags: Vec::new(),
        },
    }
}

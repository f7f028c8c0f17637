//! Supabase REST API client using service_role key, and the user store on top of it

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::config::SupabaseConfig;
use crate::game::PlayerId;

use super::users::{UserRecord, UserStore};
use super::StoreError;

const USERS_TABLE: &str = "users";

/// Supabase client for server-side database operations
/// Uses service_role key which bypasses RLS - handle with care!
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            service_role_key: config.service_role_key.clone(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Make an authenticated GET request expecting a single row
    pub async fn get_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Option<T>, StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);

        let response = self
            .authorized(self.client.get(&url))
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await
            .map_err(StoreError::Request)?;

        if response.status() == reqwest::StatusCode::NOT_ACCEPTABLE {
            // No rows found
            return Ok(None);
        }

        let response = Self::check(response).await?;
        response.json().await.map(Some).map_err(StoreError::Parse)
    }

    /// Insert a row unless its primary key already exists
    pub async fn insert_ignore<T: Serialize>(&self, table: &str, data: &T) -> Result<(), StoreError> {
        let response = self
            .authorized(self.client.post(self.rest_url(table)))
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(data)
            .send()
            .await
            .map_err(StoreError::Request)?;

        Self::check(response).await?;
        Ok(())
    }

    /// Call a Postgres function through PostgREST
    pub async fn rpc<A: Serialize, R: DeserializeOwned>(
        &self,
        function: &str,
        args: &A,
    ) -> Result<R, StoreError> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, function);

        let response = self
            .authorized(self.client.post(&url))
            .json(args)
            .send()
            .await
            .map_err(StoreError::Request)?;

        let response = Self::check(response).await?;
        response.json().await.map_err(StoreError::Parse)
    }
}

/// User records in the `users` table. Balance deltas go through Postgres
/// functions so concurrent updates cannot be lost:
///
/// - `debit_games(p_player_id, p_amount) -> boolean`
/// - `credit_games(p_player_id, p_amount) -> users`
/// - `credit_winnings(p_player_id, p_amount) -> users`
/// - `credit_deposit(p_tx_id, p_player_id, p_amount) -> setof users`: inserts
///   `p_tx_id` into `processed_deposits` (primary key `tx_id`) and credits the
///   player in the same transaction. Returns no rows when the id is already
///   recorded and raises `no_data_found` (HTTP 404) for an unknown player.
#[derive(Clone)]
pub struct SupabaseUserStore {
    client: SupabaseClient,
}

impl SupabaseUserStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    async fn credit<T: Serialize + Send + Sync>(
        &self,
        function: &str,
        player_id: PlayerId,
        amount: T,
    ) -> Result<UserRecord, StoreError> {
        let rows: Vec<UserRecord> = self
            .client
            .rpc(
                function,
                &json!({ "p_player_id": player_id, "p_amount": amount }),
            )
            .await?;
        rows.into_iter().next().ok_or(StoreError::NotFound(player_id))
    }
}

#[async_trait]
impl UserStore for SupabaseUserStore {
    async fn get(&self, player_id: PlayerId) -> Result<Option<UserRecord>, StoreError> {
        let query = format!("player_id=eq.{}", player_id);
        self.client.get_one(USERS_TABLE, &query).await
    }

    async fn create_if_absent(
        &self,
        player_id: PlayerId,
        username: &str,
        starting_balance: i64,
    ) -> Result<UserRecord, StoreError> {
        let record = UserRecord::new(player_id, username, starting_balance);
        self.client.insert_ignore(USERS_TABLE, &record).await?;
        self.get(player_id).await?.ok_or(StoreError::NoRowReturned)
    }

    async fn try_debit_games(&self, player_id: PlayerId, amount: i64) -> Result<bool, StoreError> {
        self.client
            .rpc(
                "debit_games",
                &json!({ "p_player_id": player_id, "p_amount": amount }),
            )
            .await
    }

    async fn credit_games(
        &self,
        player_id: PlayerId,
        amount: i64,
    ) -> Result<UserRecord, StoreError> {
        self.credit("credit_games", player_id, amount).await
    }

    async fn credit_winnings(
        &self,
        player_id: PlayerId,
        amount: f64,
    ) -> Result<UserRecord, StoreError> {
        self.credit("credit_winnings", player_id, amount).await
    }

    async fn credit_deposit(
        &self,
        tx_id: &str,
        player_id: PlayerId,
        amount: i64,
    ) -> Result<Option<UserRecord>, StoreError> {
        let rows: Vec<UserRecord> = self
            .client
            .rpc(
                "credit_deposit",
                &json!({ "p_tx_id": tx_id, "p_player_id": player_id, "p_amount": amount }),
            )
            .await
            .map_err(|e| match e {
                StoreError::Api { status: 404, .. } => StoreError::NotFound(player_id),
                other => other,
            })?;
        Ok(rows.into_iter().next())
    }
}

use crate::{Error, Result};
use backer_types::{
    api::{Balance, TournamentResult, Winner},
    Points,
};
use reqwest::Client as HttpClient;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

/// Timeout for connections and requests
const TIMEOUT: Duration = Duration::from_secs(30);

/// Retry policy for transient HTTP failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request (including the first attempt).
    pub max_attempts: usize,
    /// Initial backoff delay after the first retryable failure.
    pub initial_backoff: Duration,
    /// Maximum backoff delay between attempts.
    pub max_backoff: Duration,
    /// Whether requests that move points may be retried.
    ///
    /// A retried mutation can apply twice if the first attempt reached the
    /// server but its response was lost.
    pub retry_mutations: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            retry_mutations: false,
        }
    }
}

/// Backer ledger API client
#[derive(Clone)]
pub struct Client {
    pub base_url: Url,
    pub http_client: HttpClient,

    retry_policy: RetryPolicy,
}

impl Client {
    /// Create a new client
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        match base_url.scheme() {
            "http" | "https" => {}
            scheme => return Err(Error::InvalidScheme(scheme.to_string())),
        }

        let http_client = HttpClient::builder()
            .timeout(TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url,
            http_client,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Returns a copy of the current retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Sets the retry policy for subsequent HTTP requests.
    pub fn set_retry_policy(&mut self, retry_policy: RetryPolicy) {
        self.retry_policy = retry_policy;
    }

    /// Returns a new client with the provided retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base_url.join(path)?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(key, value)| (*key, value.as_str())));
        }
        Ok(url)
    }

    async fn send_with_retry(
        &self,
        mutation: bool,
        make_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let max_attempts = if !mutation || self.retry_policy.retry_mutations {
            self.retry_policy.max_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 0usize;
        let mut backoff = self.retry_policy.initial_backoff;
        loop {
            attempt += 1;
            let result = make_request().send().await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable_status(status) || attempt >= max_attempts {
                        return Ok(response);
                    }
                    debug!(%status, attempt, "retrying request");
                }
                Err(err) => {
                    if attempt >= max_attempts || !is_retryable_error(&err) {
                        return Err(Error::Reqwest(err));
                    }
                    debug!(?err, attempt, "retrying request");
                }
            }

            if backoff > Duration::ZERO {
                sleep(backoff).await;
                backoff = std::cmp::min(backoff.saturating_mul(2), self.retry_policy.max_backoff);
            }
        }
    }

    async fn mutate(&self, path: &str, query: &[(&str, String)]) -> Result<()> {
        let url = self.endpoint(path, query)?;
        debug!("Requesting {}", url);
        let response = self
            .send_with_retry(true, || self.http_client.get(url.clone()))
            .await?;
        expect_success(response).await
    }

    /// Credit points to a player, creating the account if needed
    pub async fn fund(&self, player: &str, points: Points) -> Result<()> {
        self.mutate(
            "fund",
            &[("playerId", player.to_string()), ("points", points.to_string())],
        )
        .await
    }

    /// Debit points from a player
    pub async fn take(&self, player: &str, points: Points) -> Result<()> {
        self.mutate(
            "take",
            &[("playerId", player.to_string()), ("points", points.to_string())],
        )
        .await
    }

    /// Query a player's balance, `None` if the player is unknown
    pub async fn balance(&self, player: &str) -> Result<Option<Points>> {
        let url = self.endpoint("balance", &[("playerId", player.to_string())])?;
        let response = self
            .send_with_retry(false, || self.http_client.get(url.clone()))
            .await?;
        match response.status() {
            reqwest::StatusCode::OK => {
                let balance: Balance = response.json().await?;
                if balance.player_id != player {
                    return Err(Error::UnexpectedResponse);
                }
                Ok(Some(balance.balance))
            }
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status => Err(Error::Failed(status)),
        }
    }

    pub async fn announce_tournament(&self, tournament: u64, deposit: Points) -> Result<()> {
        self.mutate(
            "announceTournament",
            &[
                ("tournamentId", tournament.to_string()),
                ("deposit", deposit.to_string()),
            ],
        )
        .await
    }

    /// Enter a player, with the deposit shared among `backers`
    pub async fn join_tournament(
        &self,
        tournament: u64,
        player: &str,
        backers: &[&str],
    ) -> Result<()> {
        let mut query = vec![
            ("tournamentId", tournament.to_string()),
            ("playerId", player.to_string()),
        ];
        query.extend(backers.iter().map(|backer| ("backerId", backer.to_string())));
        self.mutate("joinTournament", &query).await
    }

    /// Close a tournament (the oldest open one if `tournament` is `None`) and
    /// pay its winners
    pub async fn result_tournament(
        &self,
        tournament: Option<u64>,
        winners: Vec<Winner>,
    ) -> Result<()> {
        let url = self.endpoint("resultTournament", &[])?;
        let body = TournamentResult {
            tournament_id: tournament,
            winners,
        };
        let response = self
            .send_with_retry(true, || self.http_client.post(url.clone()).json(&body))
            .await?;
        expect_success(response).await
    }

    /// Wipe the ledger
    pub async fn reset(&self) -> Result<()> {
        self.mutate("reset", &[]).await
    }

    /// Fetch the server's metrics in the Prometheus text format
    pub async fn metrics(&self) -> Result<String> {
        let url = self.endpoint("metrics", &[])?;
        let response = self
            .send_with_retry(false, || self.http_client.get(url.clone()))
            .await?;
        if !response.status().is_success() {
            return Err(Error::Failed(response.status()));
        }
        Ok(response.text().await?)
    }
}

async fn expect_success(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let reason = response.text().await.unwrap_or_default();
    debug!(%status, %reason, "request rejected");
    Err(Error::Failed(status))
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    use reqwest::StatusCode;
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

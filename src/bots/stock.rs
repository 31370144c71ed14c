use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, error};

use super::{Bot, BotError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures surfaced to the room, each already phrased for humans.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StockError {
    #[error("[Stock Bot] we could not process your request now. Please try again after some time")]
    Unreachable,
    #[error("[Stock Bot] we are not able to find those quotes. Please try again after some time")]
    BadStatus,
    #[error("[Stock Bot] yikes! There's some trouble in the back. Please try again after some time")]
    Malformed,
    #[error("[Stock Bot] {0} is not a valid stock code")]
    InvalidCode(String),
}

impl From<StockError> for BotError {
    fn from(err: StockError) -> Self {
        BotError(err.to_string())
    }
}

/// Answers `/stock=<code>` with the day's opening price from a stooq-compatible
/// CSV endpoint.
#[derive(Debug, Clone)]
pub struct StockBot {
    api_url: String,
    client: reqwest::Client,
}

impl StockBot {
    pub fn new(api_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::ClientBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            api_url: api_url.into(),
            client,
        })
    }

    fn quote_url(&self, code: &str) -> Result<Url, StockError> {
        let mut url = Url::parse(&format!("{}/q/l/", self.api_url.trim_end_matches('/')))
            .map_err(|err| {
                error!(api_url = %self.api_url, %err, "invalid stock api url");
                StockError::Unreachable
            })?;
        url.query_pairs_mut()
            .append_pair("s", code)
            .append_pair("f", "sd2t2ohlcv")
            .append_key_only("h")
            .append_pair("e", "csv");
        Ok(url)
    }

    pub async fn quote(&self, argument: &str) -> Result<String, StockError> {
        let code = argument.trim().to_lowercase();
        let url = self.quote_url(&code)?;
        debug!(%url, "requesting stock quote");

        let response = self.client.get(url).send().await.map_err(|err| {
            error!(%err, "could not make request to stock api");
            StockError::Unreachable
        })?;

        let status = response.status();
        if !status.is_success() {
            error!(%status, "stock api did not answer with an ok status");
            return Err(StockError::BadStatus);
        }

        let body = response.text().await.map_err(|err| {
            error!(%err, "could not read stock api response");
            StockError::Malformed
        })?;

        parse_quote(&body, argument)
    }
}

#[async_trait]
impl Bot for StockBot {
    fn command(&self) -> &str {
        "stock"
    }

    async fn process_command(&self, argument: &str) -> Result<String, BotError> {
        Ok(self.quote(argument).await?)
    }
}

/// The body is a header row followed by one quote row:
/// `Symbol,Date,Time,Open,High,Low,Close,Volume`.
fn parse_quote(body: &str, argument: &str) -> Result<String, StockError> {
    let mut rows = body.lines().filter(|line| !line.trim().is_empty());
    let (Some(_header), Some(row)) = (rows.next(), rows.next()) else {
        error!("stock csv must have at least 2 lines");
        return Err(StockError::Malformed);
    };

    let columns: Vec<&str> = row.split(',').map(|c| c.trim().trim_matches('"')).collect();
    if columns.len() < 4 {
        error!(found = columns.len(), "stock csv row must have at least 4 columns");
        return Err(StockError::Malformed);
    }

    if columns[3] == "N/D" {
        debug!(argument, "no quotes found for stock code");
        return Err(StockError::InvalidCode(argument.to_owned()));
    }

    Ok(format!("{} quote is ${} per share", columns[0], columns[3]))
}

#[cfg(test)]
mod tests {
    use axum::{Router, extract::Query, http::StatusCode, routing::get};
    use std::collections::HashMap;

    use super::*;

    const QUOTE: &str = "Symbol,Date,Time,Open,High,Low,Close,Volume\r\n\
        JBSY.US,2024-05-02,22:00:09,134.35,135.2,133.1,134.9,117310\r\n";

    #[test]
    fn answers_with_the_opening_price() {
        assert_eq!(
            parse_quote(QUOTE, "jbsy.us").unwrap(),
            "JBSY.US quote is $134.35 per share"
        );
    }

    #[test]
    fn unknown_code() {
        let body = "Symbol,Date,Time,Open,High,Low,Close,Volume\nNOPE.US,N/D,N/D,N/D,N/D,N/D,N/D,N/D\n";
        assert_eq!(
            parse_quote(body, "nope.us").unwrap_err(),
            StockError::InvalidCode("nope.us".to_owned())
        );
        assert_eq!(
            StockError::InvalidCode("nope.us".to_owned()).to_string(),
            "[Stock Bot] nope.us is not a valid stock code"
        );
    }

    #[test]
    fn malformed_bodies() {
        for body in ["", "Symbol,Date,Time,Open", "Symbol,Date\nAAPL,2024"] {
            assert_eq!(parse_quote(body, "aapl").unwrap_err(), StockError::Malformed, "{body:?}");
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn queries_the_csv_endpoint() {
        let router = Router::new().route(
            "/q/l/",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("s").map(String::as_str), Some("jbsy.us"));
                assert_eq!(params.get("f").map(String::as_str), Some("sd2t2ohlcv"));
                assert_eq!(params.get("e").map(String::as_str), Some("csv"));
                assert!(params.contains_key("h"));
                QUOTE
            }),
        );
        let bot = StockBot::new(serve(router).await).unwrap();

        assert_eq!(
            bot.process_command(" JBSY.US ").await.unwrap(),
            "JBSY.US quote is $134.35 per share"
        );
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let router = Router::new().route("/q/l/", get(|| async { StatusCode::BAD_GATEWAY }));
        let bot = StockBot::new(serve(router).await).unwrap();

        assert_eq!(
            bot.process_command("fb").await.unwrap_err(),
            BotError::from(StockError::BadStatus)
        );
    }

    #[tokio::test]
    async fn unreachable_api() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let bot = StockBot::new(format!("http://{addr}")).unwrap();
        assert_eq!(bot.quote("fb").await.unwrap_err(), StockError::Unreachable);
    }
}

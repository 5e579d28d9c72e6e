// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::filter::rule::{FilterRule, FilterRuleMap};
use crate::sources::{FilterEvent, FilterSource, SourceError, diff_filters};

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Filter store served by a remote configuration service.
///
/// Watching is done by polling the cluster listing and diffing it against
/// the previous one.
#[derive(Clone, Debug)]
pub struct HttpFilterSource {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    retry_interval: Duration,
}

impl HttpFilterSource {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, poll_interval: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    fn filters_url(&self, cluster: &str) -> String {
        format!("{}/api/v1/shipper/filters/{cluster}/level", self.base_url)
    }

    fn filter_url(&self, cluster: &str, log_id: &str) -> String {
        format!("{}/{log_id}", self.filters_url(cluster))
    }
}

/// `None` when the cluster listing does not exist (`404`).
async fn fetch_filters(
    client: &reqwest::Client,
    url: &str,
) -> Result<Option<BTreeMap<String, FilterRule>>, SourceError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }
    let listing: FilterRuleMap = response.json().await?;
    Ok(Some(listing.filter))
}

#[async_trait]
impl FilterSource for HttpFilterSource {
    async fn wait_until_available(&self, cluster: &str) -> Result<(), SourceError> {
        let url = self.filters_url(cluster);
        loop {
            match self.client.get(&url).send().await {
                Ok(response)
                    if response.status().is_success()
                        || response.status() == StatusCode::NOT_FOUND =>
                {
                    return Ok(());
                }
                Ok(response) => {
                    debug!(
                        "FILTER_STORE | Filter store root not ready yet, status {}",
                        response.status()
                    );
                }
                Err(e) => debug!("FILTER_STORE | Filter store root not reachable yet: {e}"),
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    async fn get_filters(&self, cluster: &str) -> Result<BTreeMap<String, FilterRule>, SourceError> {
        Ok(fetch_filters(&self.client, &self.filters_url(cluster))
            .await?
            .unwrap_or_default())
    }

    async fn create_filter(
        &self,
        cluster: &str,
        log_id: &str,
        rule: &FilterRule,
    ) -> Result<(), SourceError> {
        let response = self
            .client
            .post(self.filter_url(cluster, log_id))
            .json(rule)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            debug!("FILTER_STORE | Filter for log {log_id} already exists in cluster {cluster}");
            return Ok(());
        }
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        cluster: &str,
    ) -> Result<mpsc::UnboundedReceiver<FilterEvent>, SourceError> {
        let url = self.filters_url(cluster);
        let mut known = fetch_filters(&self.client, &url)
            .await?
            .unwrap_or_default();
        let client = self.client.clone();
        let poll_interval = self.poll_interval;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately; the baseline was just fetched.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = tx.closed() => break,
                    _ = ticker.tick() => {}
                }

                // A listing that vanished after bootstrap is a failed poll, not
                // a removal of every rule.
                match fetch_filters(&client, &url).await {
                    Ok(Some(current)) => {
                        for event in diff_filters(&known, &current) {
                            if tx.send(event).is_err() {
                                return;
                            }
                        }
                        known = current;
                    }
                    Ok(None) => {
                        warn!("FILTER_STORE | Filter listing {url} not found, keeping known filters");
                    }
                    Err(e) => warn!("FILTER_STORE | Failed to poll filters from {url}: {e}"),
                }
            }
            debug!("FILTER_STORE | Stopped polling {url}");
        });

        Ok(rx)
    }
}

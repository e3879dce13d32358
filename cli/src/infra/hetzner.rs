//! Hetzner Cloud compute and Hetzner DNS over their REST APIs.

use std::time::Duration;

use anyhow::{Context, Result};
use keel_common::PowerOp;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::application::ports::{ComputeProvider, DnsProvider, Instance, InstanceSpec};

pub const HCLOUD_API: &str = "https://api.hetzner.cloud/v1";
pub const HETZNER_DNS_API: &str = "https://dns.hetzner.com/api/v1";

fn client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("keel/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    message: String,
}

/// Turn a non-success response into an error carrying the API message.
async fn check(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| format!("{} ({})", b.error.message, b.error.code))
        .unwrap_or(body);
    anyhow::bail!("{what} failed: HTTP {}: {}", status.as_u16(), detail.trim())
}

// ── Compute ───────────────────────────────────────────────────────────────────

pub struct HetznerCloud {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Serialize)]
struct CreateServer<'a> {
    name: &'a str,
    server_type: &'a str,
    image: &'a str,
    location: &'a str,
    user_data: &'a str,
    start_after_create: bool,
}

#[derive(Deserialize)]
struct CreateServerResponse {
    server: Server,
}

#[derive(Deserialize)]
struct Server {
    id: u64,
    public_net: PublicNet,
    server_type: ServerType,
}

#[derive(Deserialize)]
struct PublicNet {
    ipv4: Option<Ipv4>,
}

#[derive(Deserialize)]
struct Ipv4 {
    ip: String,
}

#[derive(Deserialize)]
struct ServerType {
    #[serde(default)]
    prices: Vec<LocationPrice>,
}

#[derive(Deserialize)]
struct LocationPrice {
    location: String,
    price_hourly: Price,
    price_monthly: Price,
}

#[derive(Deserialize)]
struct Price {
    gross: String,
}

impl Server {
    fn into_instance(self, location: &str) -> Result<Instance> {
        let public_ip = self
            .public_net
            .ipv4
            .map(|v4| v4.ip)
            .ok_or_else(|| anyhow::anyhow!("server {} has no public IPv4", self.id))?;
        let price = self
            .server_type
            .prices
            .iter()
            .find(|p| p.location == location);
        let (hourly_cost, monthly_cost) = price.map_or((0.0, 0.0), |p| {
            (
                p.price_hourly.gross.parse().unwrap_or(0.0),
                p.price_monthly.gross.parse().unwrap_or(0.0),
            )
        });
        Ok(Instance {
            provider_instance_id: self.id.to_string(),
            public_ip,
            hourly_cost,
            monthly_cost,
        })
    }
}

impl HetznerCloud {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(token: &str, timeout: Duration) -> Result<Self> {
        Self::with_url(HCLOUD_API, token, timeout)
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_url(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
        })
    }

    fn request(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }
}

fn power_action(op: PowerOp) -> &'static str {
    match op {
        PowerOp::Start => "poweron",
        PowerOp::Stop => "shutdown",
        PowerOp::Reboot => "reboot",
    }
}

impl ComputeProvider for HetznerCloud {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
        let body = CreateServer {
            name: &spec.name,
            server_type: &spec.server_type,
            image: &spec.image,
            location: &spec.location,
            user_data: &spec.user_data,
            start_after_create: true,
        };
        let response = self
            .request(self.client.post(format!("{}/servers", self.base_url)))
            .json(&body)
            .send()
            .await
            .context("calling Hetzner Cloud")?;
        let created: CreateServerResponse = check(response, "server create")
            .await?
            .json()
            .await
            .context("parsing server create response")?;
        let instance = created.server.into_instance(&spec.location)?;
        info!(id = %instance.provider_instance_id, ip = %instance.public_ip, "hetzner server created");
        Ok(instance)
    }

    async fn delete_instance(&self, provider_instance_id: &str) -> Result<()> {
        if provider_instance_id.is_empty() {
            return Ok(());
        }
        let response = self
            .request(
                self.client
                    .delete(format!("{}/servers/{provider_instance_id}", self.base_url)),
            )
            .send()
            .await
            .context("calling Hetzner Cloud")?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(id = provider_instance_id, "server already gone");
            return Ok(());
        }
        check(response, "server delete").await?;
        Ok(())
    }

    async fn power(&self, provider_instance_id: &str, op: PowerOp) -> Result<()> {
        let url = format!(
            "{}/servers/{provider_instance_id}/actions/{}",
            self.base_url,
            power_action(op)
        );
        let response = self
            .request(self.client.post(url))
            .send()
            .await
            .context("calling Hetzner Cloud")?;
        check(response, "power action").await?;
        Ok(())
    }
}

// ── DNS ───────────────────────────────────────────────────────────────────────

pub struct HetznerDns {
    client: Client,
    base_url: String,
    token: String,
    ttl: u32,
}

#[derive(Deserialize)]
struct ZonesResponse {
    zones: Vec<Zone>,
}

#[derive(Deserialize)]
struct Zone {
    id: String,
}

#[derive(Deserialize)]
struct RecordsResponse {
    records: Vec<Record>,
}

#[derive(Deserialize)]
struct Record {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    name: String,
}

#[derive(Serialize)]
struct RecordBody<'a> {
    zone_id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
    value: &'a str,
    ttl: u32,
}

impl HetznerDns {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(token: &str, ttl: u32, timeout: Duration) -> Result<Self> {
        Self::with_url(HETZNER_DNS_API, token, ttl, timeout)
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_url(base_url: &str, token: &str, ttl: u32, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
            ttl,
        })
    }

    fn request(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("Auth-API-Token", &self.token)
    }

    async fn zone_id(&self, zone: &str) -> Result<String> {
        let response = self
            .request(self.client.get(format!("{}/zones", self.base_url)))
            .query(&[("name", zone)])
            .send()
            .await
            .context("calling Hetzner DNS")?;
        let zones: ZonesResponse = check(response, "zone lookup")
            .await?
            .json()
            .await
            .context("parsing zones")?;
        zones
            .zones
            .into_iter()
            .next()
            .map(|z| z.id)
            .ok_or_else(|| anyhow::anyhow!("DNS zone '{zone}' not found"))
    }

    async fn find_a_record(&self, zone_id: &str, name: &str) -> Result<Option<String>> {
        let response = self
            .request(self.client.get(format!("{}/records", self.base_url)))
            .query(&[("zone_id", zone_id)])
            .send()
            .await
            .context("calling Hetzner DNS")?;
        let records: RecordsResponse = check(response, "record lookup")
            .await?
            .json()
            .await
            .context("parsing records")?;
        Ok(records
            .records
            .into_iter()
            .find(|r| r.kind == "A" && r.name == name)
            .map(|r| r.id))
    }
}

impl DnsProvider for HetznerDns {
    async fn upsert_a_record(&self, zone: &str, name: &str, ip: &str) -> Result<()> {
        let zone_id = self.zone_id(zone).await?;
        let body = RecordBody {
            zone_id: &zone_id,
            kind: "A",
            name,
            value: ip,
            ttl: self.ttl,
        };
        let request = match self.find_a_record(&zone_id, name).await? {
            Some(id) => self
                .client
                .put(format!("{}/records/{id}", self.base_url)),
            None => self.client.post(format!("{}/records", self.base_url)),
        };
        let response = self
            .request(request)
            .json(&body)
            .send()
            .await
            .context("calling Hetzner DNS")?;
        check(response, "record upsert").await?;
        info!(zone, name, ip, "A record upserted");
        Ok(())
    }

    async fn delete_a_record(&self, zone: &str, name: &str) -> Result<()> {
        let zone_id = self.zone_id(zone).await?;
        let Some(id) = self.find_a_record(&zone_id, name).await? else {
            debug!(zone, name, "no A record to delete");
            return Ok(());
        };
        let response = self
            .request(self.client.delete(format!("{}/records/{id}", self.base_url)))
            .send()
            .await
            .context("calling Hetzner DNS")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response, "record delete").await?;
        Ok(())
    }
}

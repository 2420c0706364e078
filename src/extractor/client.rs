use super::normalize::{format_tax_id, tax_id_digits};
use super::parser::parse_registry_page;
use super::types::ScrapedRecord;
use super::Extractor;
use crate::error::ExtractorError;

use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_REGISTRY_URL: &str =
    "https://appasp.sefaz.go.gov.br/sintegra/consulta/consultar.asp";
pub const DEFAULT_REFERER: &str = "https://appasp.sefaz.go.gov.br/sintegra/consulta/default.html";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:141.0) Gecko/20100101 Firefox/141.0";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Form field selecting the document type; `"2"` means CNPJ.
const FORM_DOC_TYPE: &str = "rTipoDoc";
const FORM_DOC: &str = "tDoc";
const DOC_TYPE_CNPJ: &str = "2";

/// HTTP client for the Sintegra registry portal.
///
/// The portal rejects requests that do not look like they come from its own
/// search form, so the browser `User-Agent` and `Referer` are required.
#[derive(Clone)]
pub struct SintegraClient {
    http_client: reqwest::Client,
    endpoint: String,
}

impl SintegraClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ExtractorError> {
        let http_client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
        })
    }

    async fn fetch_page(&self, formatted_tax_id: &str) -> Result<String, ExtractorError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .header(reqwest::header::REFERER, DEFAULT_REFERER)
            .form(&[(FORM_DOC_TYPE, DOC_TYPE_CNPJ), (FORM_DOC, formatted_tax_id)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractorError::Transport(format!(
                "registry answered HTTP {}",
                status
            )));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl Extractor for SintegraClient {
    async fn fetch(&self, tax_id: &str) -> Result<ScrapedRecord, ExtractorError> {
        let digits = tax_id_digits(tax_id);
        let formatted = format_tax_id(&digits)
            .ok_or_else(|| ExtractorError::InvalidInput(tax_id.to_string()))?;

        tracing::info!("Querying registry for tax id {}", digits);
        let html = self.fetch_page(&formatted).await?;

        tracing::debug!(
            "Registry answered for {} ({} bytes), parsing",
            digits,
            html.len()
        );
        let mut record = parse_registry_page(&html, &formatted)?;
        record.queried_tax_id = Some(digits);
        Ok(record)
    }
}

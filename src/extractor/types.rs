//! Registry Record Types
//!
//! `ScrapedRecord` is the canonical projection of a registry page: the guaranteed
//! fields (`tax_id`, `economic_activity`), typed optional fields for the labels the
//! registry is known to publish, and an open extension map for everything else.
//! Serialized field names are the normalized registry keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status value recorded when the registry reports that the tax id is not registered.
pub const NOT_REGISTERED_STATUS: &str = "NAO CADASTRADO";

/// One `code - description` pair from the economic activity section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityEntry {
    pub code: String,
    pub description: String,
}

/// Economic activity codes, in page order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EconomicActivity {
    pub primary: Vec<ActivityEntry>,
    pub secondary: Vec<ActivityEntry>,
}

impl EconomicActivity {
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.secondary.is_empty()
    }
}

/// A registry record, built once per successful parse and immutable afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScrapedRecord {
    /// Tax id in the registry's punctuated form, e.g. `00.012.377/0001-60`.
    pub tax_id: String,
    pub economic_activity: EconomicActivity,

    /// Digits-only tax id that was queried.
    #[serde(rename = "cnpj_consultado", default, skip_serializing_if = "Option::is_none")]
    pub queried_tax_id: Option<String>,
    #[serde(rename = "inscricao_estadual", default, skip_serializing_if = "Option::is_none")]
    pub state_registration: Option<String>,
    #[serde(rename = "cadastro_atualizado_em", default, skip_serializing_if = "Option::is_none")]
    pub record_updated_at: Option<String>,
    #[serde(rename = "nome_empresarial", default, skip_serializing_if = "Option::is_none")]
    pub legal_name: Option<String>,
    #[serde(rename = "contribuinte", default, skip_serializing_if = "Option::is_none")]
    pub taxpayer: Option<String>,
    #[serde(rename = "nome_da_propriedade", default, skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
    #[serde(rename = "endereco_estabelecimento", default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(rename = "unidade_auxiliar", default, skip_serializing_if = "Option::is_none")]
    pub auxiliary_unit: Option<String>,
    #[serde(rename = "condicao_de_uso", default, skip_serializing_if = "Option::is_none")]
    pub usage_condition: Option<String>,
    #[serde(rename = "data_final_de_contrato", default, skip_serializing_if = "Option::is_none")]
    pub contract_end_date: Option<String>,
    #[serde(rename = "regime_de_apuracao", default, skip_serializing_if = "Option::is_none")]
    pub tax_regime: Option<String>,
    #[serde(rename = "situacao_cadastral_vigente", default, skip_serializing_if = "Option::is_none")]
    pub registration_status: Option<String>,
    #[serde(rename = "data_desta_situacao_cadastral", default, skip_serializing_if = "Option::is_none")]
    pub registration_status_date: Option<String>,
    #[serde(rename = "data_de_cadastramento", default, skip_serializing_if = "Option::is_none")]
    pub registered_on: Option<String>,
    #[serde(rename = "operacoes_com_nfe", default, skip_serializing_if = "Option::is_none")]
    pub electronic_invoice_operations: Option<String>,
    #[serde(rename = "data_da_consulta", default, skip_serializing_if = "Option::is_none")]
    pub queried_at: Option<String>,

    /// Registry fields outside the known set, keyed by normalized label.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl ScrapedRecord {
    /// The minimal record for a tax id the registry does not know.
    pub fn not_registered(tax_id: impl Into<String>) -> Self {
        Self {
            tax_id: tax_id.into(),
            registration_status: Some(NOT_REGISTERED_STATUS.to_string()),
            ..Self::default()
        }
    }

    /// Assembles a record from normalized `key -> value` fields.
    ///
    /// `tax_id` comes from the page's `cnpj` (or `cnpj_cpf`) field, falling back to
    /// `requested_tax_id`. Known keys land in typed fields, the rest in `extra`.
    pub fn from_fields(
        requested_tax_id: &str,
        mut fields: BTreeMap<String, String>,
        economic_activity: EconomicActivity,
    ) -> Self {
        let tax_id = fields
            .remove("cnpj")
            .or_else(|| fields.remove("cnpj_cpf"))
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| requested_tax_id.to_string());

        let mut take = |key: &str| fields.remove(key);

        let mut record = Self {
            tax_id,
            economic_activity,
            queried_tax_id: take("cnpj_consultado"),
            state_registration: take("inscricao_estadual"),
            record_updated_at: take("cadastro_atualizado_em"),
            legal_name: take("nome_empresarial"),
            taxpayer: take("contribuinte"),
            property_name: take("nome_da_propriedade"),
            address: take("endereco_estabelecimento"),
            auxiliary_unit: take("unidade_auxiliar"),
            usage_condition: take("condicao_de_uso"),
            contract_end_date: take("data_final_de_contrato"),
            tax_regime: take("regime_de_apuracao"),
            registration_status: take("situacao_cadastral_vigente"),
            registration_status_date: take("data_desta_situacao_cadastral"),
            registered_on: take("data_de_cadastramento"),
            electronic_invoice_operations: take("operacoes_com_nfe"),
            queried_at: take("data_da_consulta"),
            extra: BTreeMap::new(),
        };
        record.extra = fields;
        record
    }

    /// `false` only for the minimal record produced from a not-found page.
    pub fn is_registered(&self) -> bool {
        self.registration_status.as_deref() != Some(NOT_REGISTERED_STATUS)
    }
}

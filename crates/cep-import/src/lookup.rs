//! Postal code lookup against imported tables.

use crate::error::{ImportError, Result};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

/// One address answering a CEP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Address {
    pub cep: String,
    pub uf: String,
    pub localidade: String,
    pub bairro: Option<String>,
    pub logradouro: Option<String>,
    pub complemento: Option<String>,
    /// IBGE municipality code.
    pub ibge: Option<String>,
    /// Table the match came from.
    pub origem: String,
}

/// Accepts `87010-000`, `87010000` or `87.010-000`.
pub fn normalize_cep(input: &str) -> Result<String> {
    let digits: String = input
        .chars()
        .filter(|c| !matches!(c, '-' | '.' | ' '))
        .collect();

    if digits.len() == 8 && digits.bytes().all(|b| b.is_ascii_digit()) {
        Ok(digits)
    } else {
        Err(ImportError::InvalidCep(input.to_string()))
    }
}

/// Streets, uncoded localities and large users carrying `cep`.
pub async fn lookup_cep(pool: &PgPool, schema: &str, cep: &str) -> Result<Vec<Address>> {
    let cep = normalize_cep(cep)?;
    let query = format!(
        "SELECT l.cep, l.ufe_sg AS uf, loc.loc_no AS localidade, b.bai_no AS bairro,
                trim(l.tlo_tx || ' ' || l.log_no) AS logradouro,
                l.log_complemento AS complemento, loc.mun_nu AS ibge,
                'log_logradouro' AS origem
           FROM {s}.log_logradouro l
           JOIN {s}.log_localidade loc ON loc.loc_nu = l.loc_nu
           LEFT JOIN {s}.log_bairro b ON b.bai_nu = l.bai_nu_ini
          WHERE l.cep = $1
         UNION ALL
         SELECT loc.cep, loc.ufe_sg, loc.loc_no, NULL, NULL, NULL, loc.mun_nu,
                'log_localidade'
           FROM {s}.log_localidade loc
          WHERE loc.cep = $1
         UNION ALL
         SELECT g.cep, g.ufe_sg, loc.loc_no, b.bai_no, g.gru_endereco, g.gru_no,
                loc.mun_nu, 'log_grande_usuario'
           FROM {s}.log_grande_usuario g
           JOIN {s}.log_localidade loc ON loc.loc_nu = g.loc_nu
           LEFT JOIN {s}.log_bairro b ON b.bai_nu = g.bai_nu
          WHERE g.cep = $1",
        s = schema
    );

    let addresses = sqlx::query_as::<_, Address>(&query)
        .bind(&cep)
        .fetch_all(pool)
        .await?;

    tracing::debug!(cep = %cep, matches = addresses.len(), "CEP lookup");
    Ok(addresses)
}

//! The fixed set of eDNE datasets and how each one maps onto a table.
//!
//! A [`DatasetDescriptor`] is the single source of truth for a dataset: which
//! file (or file pattern) feeds it, the column layout of its table, how each
//! raw field is coerced, and how a sink resolves key conflicts. The parser,
//! the sinks and the DDL generator all read from it, so column lists cannot
//! drift apart.

use crate::error::{ImportError, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Column type in the target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Numeric,
    Char(u16),
    Varchar(u16),
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Numeric => write!(f, "numeric"),
            SqlType::Char(len) => write!(f, "char({})", len),
            SqlType::Varchar(len) => write!(f, "varchar({})", len),
        }
    }
}

/// How one raw field becomes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRule {
    /// Trimmed text. An empty field stays an empty string.
    Literal,
    /// Trimmed text. An empty field becomes null.
    Text,
    /// Text exactly as read. An empty field becomes null.
    Raw,
    /// Trimmed, parsed as a 64-bit integer. An empty field becomes null.
    Numeric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub rule: FieldRule,
    pub description: &'static str,
}

impl Column {
    pub const fn numeric(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            sql_type: SqlType::Numeric,
            nullable: false,
            rule: FieldRule::Numeric,
            description,
        }
    }

    pub const fn char(name: &'static str, len: u16, description: &'static str) -> Self {
        Self {
            name,
            sql_type: SqlType::Char(len),
            nullable: false,
            rule: FieldRule::Text,
            description,
        }
    }

    pub const fn varchar(name: &'static str, len: u16, description: &'static str) -> Self {
        Self {
            name,
            sql_type: SqlType::Varchar(len),
            nullable: false,
            rule: FieldRule::Text,
            description,
        }
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Keeps empty fields as empty strings instead of nulls.
    pub const fn literal(mut self) -> Self {
        self.rule = FieldRule::Literal;
        self
    }

    /// Skips trimming; for sinks that normalise whitespace themselves.
    pub const fn raw(mut self) -> Self {
        self.rule = FieldRule::Raw;
        self
    }
}

/// How a sink treats a row whose key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Plain bulk insert. Re-importing the same file adds the rows again
    /// (or trips the table's primary key).
    Append,
    /// Insert or replace by primary key. Re-importing is idempotent.
    Upsert,
}

impl ConflictPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictPolicy::Append => "append",
            ConflictPolicy::Upsert => "upsert",
        }
    }
}

/// What to do with a line that has too few or too many fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArityPolicy {
    /// Fail the dataset.
    Reject,
    /// Log and drop the line.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum DatasetSource {
    /// One literal file name under the base directory.
    File(&'static str),
    /// A glob over the base directory, one sub-worker per match.
    Pattern(&'static str),
}

impl DatasetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetSource::File(name) | DatasetSource::Pattern(name) => name,
        }
    }

    /// True when `identifier` names this source or, for patterns, is a file the
    /// pattern would pick up.
    pub fn matches(&self, identifier: &str) -> bool {
        match self {
            DatasetSource::File(name) => *name == identifier,
            DatasetSource::Pattern(pattern) => {
                *pattern == identifier
                    || glob::Pattern::new(pattern)
                        .map(|p| p.matches(identifier))
                        .unwrap_or(false)
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatasetDescriptor {
    pub id: &'static str,
    pub source: DatasetSource,
    pub table: &'static str,
    pub columns: &'static [Column],
    pub primary_key: &'static [&'static str],
    pub conflict: ConflictPolicy,
    pub arity: ArityPolicy,
}

impl DatasetDescriptor {
    /// Fields a line must carry: everything up to the last NOT NULL column.
    /// Missing trailing fields after that point are read as null.
    pub fn min_fields(&self) -> usize {
        self.columns
            .iter()
            .rposition(|c| !c.nullable)
            .map_or(0, |i| i + 1)
    }

    pub fn max_fields(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Positions of the primary key columns, in key order.
    pub fn key_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|key| self.column_index(key))
            .collect()
    }

    pub fn with_arity(mut self, arity: ArityPolicy) -> Self {
        self.arity = arity;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(ImportError::config(format!(
                "dataset {} declares no columns",
                self.id
            )));
        }

        for key in self.primary_key {
            if self.column_index(key).is_none() {
                return Err(ImportError::config(format!(
                    "dataset {}: primary key column '{}' is not a column of {}",
                    self.id, key, self.table
                )));
            }
        }

        if self.conflict == ConflictPolicy::Upsert && self.primary_key.is_empty() {
            return Err(ImportError::config(format!(
                "dataset {} upserts but has no primary key",
                self.id
            )));
        }

        if let DatasetSource::Pattern(pattern) = self.source {
            glob::Pattern::new(pattern).map_err(|e| ImportError::Pattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
        }

        Ok(())
    }
}

/// The registered datasets of a run.
#[derive(Debug, Clone)]
pub struct DatasetCatalog {
    datasets: Vec<DatasetDescriptor>,
}

impl DatasetCatalog {
    pub fn new(datasets: Vec<DatasetDescriptor>) -> Result<Self> {
        let mut ids = HashSet::new();
        for descriptor in &datasets {
            descriptor.validate()?;
            if !ids.insert(descriptor.id) {
                return Err(ImportError::config(format!(
                    "dataset {} is registered twice",
                    descriptor.id
                )));
            }
        }
        Ok(Self { datasets })
    }

    /// The sixteen datasets of the eDNE "basico" distribution.
    pub fn standard() -> Self {
        Self {
            datasets: STANDARD_DATASETS.to_vec(),
        }
    }

    /// Resolves a dataset id, a literal file name, a registered pattern, or a
    /// concrete file name matched by a registered pattern.
    pub fn lookup(&self, identifier: &str) -> Result<&DatasetDescriptor> {
        self.datasets
            .iter()
            .find(|d| d.id == identifier)
            .or_else(|| self.datasets.iter().find(|d| d.source.matches(identifier)))
            .ok_or_else(|| ImportError::UnknownDataset(identifier.to_string()))
    }

    /// A catalog holding only the named datasets, in catalog order.
    pub fn select<S: AsRef<str>>(&self, identifiers: &[S]) -> Result<Self> {
        let mut wanted = HashSet::new();
        for identifier in identifiers {
            wanted.insert(self.lookup(identifier.as_ref())?.id);
        }

        Ok(Self {
            datasets: self
                .datasets
                .iter()
                .filter(|d| wanted.contains(d.id))
                .copied()
                .collect(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetDescriptor> {
        self.datasets.iter()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Tables that carry a `cep` column, used for the distinct postal code count.
    pub fn postal_code_tables(&self) -> Vec<&'static str> {
        self.datasets
            .iter()
            .filter(|d| d.column_index("cep").is_some())
            .map(|d| d.table)
            .collect()
    }
}

impl Default for DatasetCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// Standard eDNE datasets
// ============================================================================

pub const ECT_PAIS: DatasetDescriptor = DatasetDescriptor {
    id: "ECT_PAIS",
    source: DatasetSource::File("ECT_PAIS.TXT"),
    table: "ect_pais",
    columns: &[
        Column::char("pai_sg", 2, "country code").literal(),
        Column::char("pai_sg_alternativa", 3, "alternative country code"),
        Column::varchar("pai_no_portugues", 100, "country name in Portuguese"),
        Column::varchar("pai_no_ingles", 100, "country name in English"),
        Column::varchar("pai_no_frances", 100, "country name in French"),
        Column::varchar("pai_abreviatura", 100, "country abbreviation"),
    ],
    primary_key: &["pai_sg"],
    conflict: ConflictPolicy::Upsert,
    arity: ArityPolicy::Reject,
};

pub const LOG_FAIXA_UF: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_FAIXA_UF",
    source: DatasetSource::File("LOG_FAIXA_UF.TXT"),
    table: "log_faixa_uf",
    columns: &[
        Column::char("ufe_sg", 2, "state (UF) code"),
        Column::char("ufe_cep_ini", 8, "first CEP of the state"),
        Column::char("ufe_cep_fim", 8, "last CEP of the state"),
    ],
    primary_key: &["ufe_sg", "ufe_cep_ini"],
    conflict: ConflictPolicy::Append,
    arity: ArityPolicy::Reject,
};

pub const LOG_LOCALIDADE: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_LOCALIDADE",
    source: DatasetSource::File("LOG_LOCALIDADE.TXT"),
    table: "log_localidade",
    columns: &[
        Column::numeric("loc_nu", "locality key"),
        Column::char("ufe_sg", 2, "state (UF) code"),
        Column::varchar("loc_no", 72, "locality name"),
        Column::char("cep", 8, "locality CEP, set only when the locality is not coded by street")
            .nullable(),
        Column::char("loc_in_sit", 1, "coding situation: 0 uncoded, 1 coded by street, 2 district inside a coded locality, 3 coding in progress"),
        Column::char("loc_in_tipo_loc", 1, "locality type: D district, M municipality, P village"),
        Column::numeric("loc_nu_sub", "key of the parent locality").nullable(),
        Column::varchar("loc_no_abrev", 36, "abbreviated locality name").nullable(),
        Column::char("mun_nu", 7, "IBGE municipality code").nullable(),
    ],
    primary_key: &["loc_nu"],
    conflict: ConflictPolicy::Upsert,
    arity: ArityPolicy::Reject,
};

pub const LOG_VAR_LOC: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_VAR_LOC",
    source: DatasetSource::File("LOG_VAR_LOC.TXT"),
    table: "log_var_loc",
    columns: &[
        Column::numeric("loc_nu", "locality key"),
        Column::numeric("val_nu", "variant order"),
        Column::varchar("val_tx", 72, "variant name"),
    ],
    primary_key: &["loc_nu", "val_nu"],
    conflict: ConflictPolicy::Append,
    arity: ArityPolicy::Reject,
};

pub const LOG_FAIXA_LOCALIDADE: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_FAIXA_LOCALIDADE",
    source: DatasetSource::File("LOG_FAIXA_LOCALIDADE.TXT"),
    table: "log_faixa_localidade",
    columns: &[
        Column::numeric("loc_nu", "locality key"),
        Column::char("loc_cep_ini", 8, "first CEP of the locality"),
        Column::char("loc_cep_fim", 8, "last CEP of the locality"),
        Column::char("loc_tipo_faixa", 1, "range type: T whole municipality, C urban seat only"),
    ],
    primary_key: &["loc_nu", "loc_cep_ini", "loc_tipo_faixa"],
    conflict: ConflictPolicy::Append,
    arity: ArityPolicy::Reject,
};

pub const LOG_BAIRRO: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_BAIRRO",
    source: DatasetSource::File("LOG_BAIRRO.TXT"),
    table: "log_bairro",
    columns: &[
        Column::numeric("bai_nu", "neighbourhood key"),
        Column::char("ufe_sg", 2, "state (UF) code"),
        Column::char("loc_nu", 8, "locality key"),
        Column::varchar("bai_no", 72, "neighbourhood name"),
        Column::varchar("bai_no_abrev", 36, "abbreviated neighbourhood name").nullable(),
    ],
    primary_key: &["bai_nu"],
    conflict: ConflictPolicy::Upsert,
    arity: ArityPolicy::Reject,
};

pub const LOG_VAR_BAI: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_VAR_BAI",
    source: DatasetSource::File("LOG_VAR_BAI.TXT"),
    table: "log_var_bai",
    columns: &[
        Column::numeric("bai_nu", "neighbourhood key"),
        Column::char("vdb_nu", 2, "variant order"),
        Column::varchar("vdb_tx", 72, "variant name"),
    ],
    primary_key: &["bai_nu", "vdb_nu"],
    conflict: ConflictPolicy::Append,
    arity: ArityPolicy::Reject,
};

pub const LOG_FAIXA_BAIRRO: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_FAIXA_BAIRRO",
    source: DatasetSource::File("LOG_FAIXA_BAIRRO.TXT"),
    table: "log_faixa_bairro",
    columns: &[
        Column::numeric("bai_nu", "neighbourhood key"),
        Column::char("fcb_cep_ini", 8, "first CEP of the neighbourhood"),
        Column::char("fcb_cep_fim", 8, "last CEP of the neighbourhood"),
    ],
    primary_key: &["bai_nu", "fcb_cep_ini"],
    conflict: ConflictPolicy::Append,
    arity: ArityPolicy::Reject,
};

pub const LOG_CPC: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_CPC",
    source: DatasetSource::File("LOG_CPC.TXT"),
    table: "log_cpc",
    columns: &[
        Column::numeric("cpc_nu", "community post box key"),
        Column::char("ufe_sg", 2, "state (UF) code"),
        Column::numeric("loc_nu", "locality key"),
        Column::varchar("cpc_no", 72, "community post box name"),
        Column::varchar("cpc_endereco", 100, "community post box address"),
        Column::char("cep", 8, "community post box CEP"),
    ],
    primary_key: &["cpc_nu"],
    conflict: ConflictPolicy::Upsert,
    arity: ArityPolicy::Reject,
};

pub const LOG_FAIXA_CPC: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_FAIXA_CPC",
    source: DatasetSource::File("LOG_FAIXA_CPC.TXT"),
    table: "log_faixa_cpc",
    columns: &[
        Column::numeric("cpc_nu", "community post box key"),
        Column::varchar("cpc_inicial", 6, "first box number"),
        Column::varchar("cpc_final", 6, "last box number"),
    ],
    primary_key: &["cpc_nu", "cpc_inicial"],
    conflict: ConflictPolicy::Append,
    arity: ArityPolicy::Reject,
};

pub const LOG_LOGRADOURO: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_LOGRADOURO",
    source: DatasetSource::Pattern("LOG_LOGRADOURO_*.TXT"),
    table: "log_logradouro",
    columns: &[
        Column::numeric("log_nu", "street key"),
        Column::char("ufe_sg", 2, "state (UF) code"),
        Column::numeric("loc_nu", "locality key"),
        Column::numeric("bai_nu_ini", "key of the first neighbourhood"),
        Column::numeric("bai_nu_fim", "key of the last neighbourhood").nullable(),
        Column::varchar("log_no", 100, "street name"),
        Column::varchar("log_complemento", 100, "street complement").nullable(),
        Column::char("cep", 8, "street CEP"),
        Column::varchar("tlo_tx", 100, "street type"),
        Column::char("log_sta_tlo", 1, "whether the street type is used in the address (S or N)")
            .nullable(),
        Column::varchar("log_no_abrev", 100, "abbreviated street name").nullable(),
    ],
    primary_key: &["log_nu"],
    conflict: ConflictPolicy::Append,
    arity: ArityPolicy::Reject,
};

pub const LOG_VAR_LOG: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_VAR_LOG",
    source: DatasetSource::File("LOG_VAR_LOG.TXT"),
    table: "log_var_log",
    columns: &[
        Column::numeric("log_nu", "street key"),
        Column::numeric("vlo_nu", "variant order"),
        Column::varchar("tlo_tx", 36, "street type of the variant"),
        Column::varchar("vlo_tx", 150, "variant name"),
    ],
    primary_key: &["log_nu", "vlo_nu"],
    conflict: ConflictPolicy::Append,
    arity: ArityPolicy::Reject,
};

pub const LOG_NUM_SEC: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_NUM_SEC",
    source: DatasetSource::File("LOG_NUM_SEC.TXT"),
    table: "log_num_sec",
    columns: &[
        Column::numeric("log_nu", "street key"),
        Column::varchar("sec_nu_ini", 10, "first number of the section"),
        Column::varchar("sec_nu_fim", 10, "last number of the section"),
        Column::char("sec_in_lado", 1, "side: A both, P even, I odd, D right, E left"),
    ],
    primary_key: &["log_nu"],
    conflict: ConflictPolicy::Append,
    arity: ArityPolicy::Reject,
};

pub const LOG_GRANDE_USUARIO: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_GRANDE_USUARIO",
    source: DatasetSource::File("LOG_GRANDE_USUARIO.TXT"),
    table: "log_grande_usuario",
    columns: &[
        Column::numeric("gru_nu", "large user key"),
        Column::char("ufe_sg", 2, "state (UF) code"),
        Column::numeric("loc_nu", "locality key"),
        Column::numeric("bai_nu", "neighbourhood key"),
        Column::numeric("log_nu", "street key").nullable(),
        Column::varchar("gru_no", 255, "large user name"),
        Column::varchar("gru_endereco", 255, "large user address"),
        Column::char("cep", 8, "large user CEP"),
        Column::varchar("gru_no_abrev", 255, "abbreviated large user name").nullable(),
    ],
    primary_key: &["gru_nu"],
    conflict: ConflictPolicy::Upsert,
    arity: ArityPolicy::Reject,
};

pub const LOG_UNID_OPER: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_UNID_OPER",
    source: DatasetSource::File("LOG_UNID_OPER.TXT"),
    table: "log_unid_oper",
    columns: &[
        Column::numeric("uop_nu", "operational unit key"),
        Column::char("ufe_sg", 2, "state (UF) code"),
        Column::numeric("loc_nu", "locality key"),
        Column::numeric("bai_nu", "neighbourhood key"),
        Column::numeric("log_nu", "street key").nullable(),
        Column::varchar("uop_no", 100, "operational unit name"),
        Column::varchar("uop_endereco", 100, "operational unit address"),
        Column::char("cep", 8, "operational unit CEP"),
        Column::char("uop_in_cp", 1, "whether the unit has post boxes (S or N)"),
        Column::varchar("uop_no_abrev", 100, "abbreviated operational unit name").nullable(),
    ],
    primary_key: &["uop_nu"],
    conflict: ConflictPolicy::Upsert,
    arity: ArityPolicy::Reject,
};

pub const LOG_FAIXA_UOP: DatasetDescriptor = DatasetDescriptor {
    id: "LOG_FAIXA_UOP",
    source: DatasetSource::File("LOG_FAIXA_UOP.TXT"),
    table: "log_faixa_uop",
    columns: &[
        Column::numeric("uop_nu", "operational unit key"),
        Column::numeric("fnc_inicial", "first post box number"),
        Column::numeric("fnc_final", "last post box number"),
    ],
    primary_key: &["uop_nu", "fnc_inicial"],
    conflict: ConflictPolicy::Append,
    arity: ArityPolicy::Reject,
};

pub const STANDARD_DATASETS: [DatasetDescriptor; 16] = [
    ECT_PAIS,
    LOG_FAIXA_UF,
    LOG_LOCALIDADE,
    LOG_VAR_LOC,
    LOG_FAIXA_LOCALIDADE,
    LOG_BAIRRO,
    LOG_VAR_BAI,
    LOG_FAIXA_BAIRRO,
    LOG_CPC,
    LOG_FAIXA_CPC,
    LOG_LOGRADOURO,
    LOG_VAR_LOG,
    LOG_NUM_SEC,
    LOG_GRANDE_USUARIO,
    LOG_UNID_OPER,
    LOG_FAIXA_UOP,
];

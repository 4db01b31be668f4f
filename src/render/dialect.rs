//! Dialect detection and identifier quoting

use std::fmt;

/// SQL dialect of a source, derived from its connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    PostgreSql,
    Oracle,
    SqlServer,
    ClickHouse,
    Hive,
    Presto,
    Sqlite,
    H2,
    Generic,
}

impl Dialect {
    /// Dialect for a JDBC-style URL such as `jdbc:mysql://host/db`.
    pub fn from_url(url: &str) -> Self {
        let url = url.trim();
        let rest = url
            .get(..5)
            .filter(|p| p.eq_ignore_ascii_case("jdbc:"))
            .map_or(url, |_| &url[5..]);
        let scheme = rest
            .split(|c| c == ':' || c == '/')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match scheme.as_str() {
            "mysql" | "mariadb" => Dialect::MySql,
            "postgresql" | "postgres" => Dialect::PostgreSql,
            "oracle" => Dialect::Oracle,
            "sqlserver" | "jtds" => Dialect::SqlServer,
            "clickhouse" => Dialect::ClickHouse,
            "hive2" | "hive" | "spark" => Dialect::Hive,
            "presto" | "trino" => Dialect::Presto,
            "sqlite" => Dialect::Sqlite,
            "h2" => Dialect::H2,
            _ => Dialect::Generic,
        }
    }

    pub fn keyword_prefix(self) -> &'static str {
        match self {
            Dialect::MySql | Dialect::ClickHouse | Dialect::Hive => "`",
            Dialect::SqlServer => "[",
            _ => "\"",
        }
    }

    pub fn keyword_suffix(self) -> &'static str {
        match self {
            Dialect::MySql | Dialect::ClickHouse | Dialect::Hive => "`",
            Dialect::SqlServer => "]",
            _ => "\"",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::MySql => "mysql",
            Dialect::PostgreSql => "postgresql",
            Dialect::Oracle => "oracle",
            Dialect::SqlServer => "sqlserver",
            Dialect::ClickHouse => "clickhouse",
            Dialect::Hive => "hive",
            Dialect::Presto => "presto",
            Dialect::Sqlite => "sqlite",
            Dialect::H2 => "h2",
            Dialect::Generic => "generic",
        };
        write!(f, "{name}")
    }
}

/// Open/close identifier quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quoting {
    pub prefix: String,
    pub suffix: String,
}

impl Quoting {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Quoting {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn for_dialect(dialect: Dialect) -> Self {
        Quoting::new(dialect.keyword_prefix(), dialect.keyword_suffix())
    }

    /// Quote an identifier; `*` passes through and an embedded closing quote
    /// is doubled.
    pub fn quote(&self, ident: &str) -> String {
        let ident = ident.trim();
        if ident == "*" {
            return ident.to_string();
        }
        if self.suffix.is_empty() {
            return format!("{}{ident}", self.prefix);
        }
        let escaped = ident.replace(&self.suffix, &self.suffix.repeat(2));
        format!("{}{escaped}{}", self.prefix, self.suffix)
    }
}

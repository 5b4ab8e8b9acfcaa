//! # Alert Query Filters
//!
//! The filter accepted by every alert store, and the PostgreSQL statement
//! built from it. Filters are independent and optional: only the ones that
//! are set contribute a predicate, joined with `AND`. Filter values are always
//! bound as parameters, never spliced into the statement text.

use serde::{Deserialize, Serialize};

use crate::models::alert::{AlertPayload, FIELD_MENSAJE, FIELD_REGION, FIELD_TIPO};

/// Direction of the timestamp ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SortOrder {
    /// Oldest first.
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

impl SortOrder {
    /// Parses an order name. Anything that is not an ascending spelling is
    /// treated as descending.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }

    /// SQL keyword for this direction.
    pub fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl From<String> for SortOrder {
    fn from(value: String) -> Self {
        SortOrder::parse(&value)
    }
}

impl From<SortOrder> for String {
    fn from(order: SortOrder) -> Self {
        match order {
            SortOrder::Asc => "asc".to_string(),
            SortOrder::Desc => "desc".to_string(),
        }
    }
}

/// # Alert Filter
///
/// `region` and `tipo` match the payload fields exactly; `mensaje` matches
/// case-insensitively anywhere in the message. `limit` and `offset` apply
/// after ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub region: Option<String>,
    pub tipo: Option<String>,
    pub mensaje: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(default)]
    pub order: SortOrder,
}

impl AlertFilter {
    /// Filter on the `region` field only.
    pub fn by_region(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Self::default()
        }
    }

    /// Filter on the `tipo` field only.
    pub fn by_tipo(tipo: impl Into<String>) -> Self {
        Self {
            tipo: Some(tipo.into()),
            ..Self::default()
        }
    }

    /// Whether a stored payload satisfies the field predicates of this filter.
    pub fn matches(&self, payload: &AlertPayload) -> bool {
        let exact = |key: &str, wanted: &Option<String>| match wanted {
            None => true,
            Some(wanted) => payload.field(key).as_deref() == Some(wanted.as_str()),
        };
        let contains = match &self.mensaje {
            None => true,
            Some(needle) => payload
                .field(FIELD_MENSAJE)
                .is_some_and(|m| m.to_lowercase().contains(&needle.to_lowercase())),
        };
        exact(FIELD_REGION, &self.region) && exact(FIELD_TIPO, &self.tipo) && contains
    }
}

/// Escapes `LIKE` metacharacters so `value` matches literally.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// How filter predicates reach into the payload text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldAccess {
    /// Through the `alert_field` helper, which yields NULL for any text that is not JSON.
    Helper,
    /// Inline `->>` guarded so only payloads shaped like JSON objects are cast.
    #[default]
    Inline,
}

impl FieldAccess {
    /// SQL expression for the text of payload field `key`.
    pub fn expr(self, key: &str) -> String {
        match self {
            FieldAccess::Helper => format!("alert_field(payload, '{key}')"),
            FieldAccess::Inline => format!("(CASE WHEN payload ~ '^\\s*\\{{' THEN payload::jsonb ->> '{key}' END)"),
        }
    }
}

#[cfg(feature = "connections")]
pub use sql::select_alerts;

#[cfg(feature = "connections")]
mod sql {
    use sqlx::{Postgres, QueryBuilder};

    use super::{escape_like, AlertFilter, FieldAccess};
    use crate::models::alert::{FIELD_MENSAJE, FIELD_REGION, FIELD_TIPO};

    const SELECT_ALERTS: &str = "SELECT id::BIGINT AS id, topic, payload, timestamp FROM alerts";

    /// Builds the filtered `SELECT` for `filter`.
    pub fn select_alerts(filter: &AlertFilter, access: FieldAccess) -> QueryBuilder<'static, Postgres> {
        let mut query = QueryBuilder::new(SELECT_ALERTS);
        let mut joiner = " WHERE ";

        for (key, wanted) in [(FIELD_REGION, &filter.region), (FIELD_TIPO, &filter.tipo)] {
            if let Some(wanted) = wanted {
                query
                    .push(joiner)
                    .push(access.expr(key))
                    .push(" = ")
                    .push_bind(wanted.clone());
                joiner = " AND ";
            }
        }
        if let Some(needle) = &filter.mensaje {
            query
                .push(joiner)
                .push(access.expr(FIELD_MENSAJE))
                .push(" ILIKE ")
                .push_bind(format!("%{}%", escape_like(needle)));
        }

        let direction = filter.order.keyword();
        query.push(format!(" ORDER BY timestamp {direction}, id {direction}"));
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit);
        }
        if let Some(offset) = filter.offset {
            query.push(" OFFSET ").push_bind(offset);
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_orders_fall_back_to_descending() {
        assert_eq!(SortOrder::parse("asc"), SortOrder::Asc);
        assert_eq!(SortOrder::parse(" ASCENDING "), SortOrder::Asc);
        assert_eq!(SortOrder::parse("desc"), SortOrder::Desc);
        assert_eq!(SortOrder::parse("sideways"), SortOrder::Desc);
        assert_eq!(SortOrder::parse("1; DROP TABLE alerts"), SortOrder::Desc);
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("100%_seguro\\"), "100\\%\\_seguro\\\\");
        assert_eq!(escape_like("sismo"), "sismo");
    }

    #[test]
    fn payload_predicates_compose() {
        let payload = AlertPayload::decode(r#"{"tipo":"sismo","region":"Quito","mensaje":"Temblor FUERTE"}"#);
        assert!(AlertFilter::default().matches(&payload));
        assert!(AlertFilter::by_region("Quito").matches(&payload));
        assert!(!AlertFilter::by_region("quito").matches(&payload));

        let filter = AlertFilter {
            tipo: Some("sismo".into()),
            mensaje: Some("fuerte".into()),
            ..AlertFilter::by_region("Quito")
        };
        assert!(filter.matches(&payload));

        let raw = AlertPayload::decode("not json");
        assert!(AlertFilter::default().matches(&raw));
        assert!(!AlertFilter::by_tipo("sismo").matches(&raw));
    }

    #[cfg(feature = "connections")]
    #[test]
    fn statement_text_binds_every_value() {
        let filter = AlertFilter {
            region: Some("Quito'; DROP TABLE alerts; --".into()),
            tipo: Some("sismo".into()),
            mensaje: Some("temblor".into()),
            limit: Some(10),
            offset: Some(5),
            order: SortOrder::Asc,
        };
        let query = select_alerts(&filter, FieldAccess::Helper);
        assert_eq!(
            query.sql(),
            "SELECT id::BIGINT AS id, topic, payload, timestamp FROM alerts \
             WHERE alert_field(payload, 'region') = $1 AND alert_field(payload, 'tipo') = $2 \
             AND alert_field(payload, 'mensaje') ILIKE $3 \
             ORDER BY timestamp ASC, id ASC LIMIT $4 OFFSET $5"
        );
        assert!(!query.sql().contains("DROP"));
    }

    #[cfg(feature = "connections")]
    #[test]
    fn no_filters_means_no_where_clause() {
        let query = select_alerts(&AlertFilter::default(), FieldAccess::Helper);
        assert_eq!(
            query.sql(),
            "SELECT id::BIGINT AS id, topic, payload, timestamp FROM alerts ORDER BY timestamp DESC, id DESC"
        );
    }

    #[cfg(feature = "connections")]
    #[test]
    fn inline_access_guards_the_jsonb_cast() {
        let query = select_alerts(&AlertFilter::by_tipo("sismo"), FieldAccess::Inline);
        assert_eq!(
            query.sql(),
            "SELECT id::BIGINT AS id, topic, payload, timestamp FROM alerts \
             WHERE (CASE WHEN payload ~ '^\\s*\\{' THEN payload::jsonb ->> 'tipo' END) = $1 \
             ORDER BY timestamp DESC, id DESC"
        );
    }
}

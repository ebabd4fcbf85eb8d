use crate::core::{FieldMap, Value};
use serde::{Deserialize, Serialize};

/// The caller's last known state of one record.
///
/// Comparison against the stored row is asymmetric: only fields present in
/// the snapshot are checked. A field left out is never compared, so a partial
/// snapshot cannot detect concurrent changes to it.
///
/// There is no mutating API; build a new snapshot instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(FieldMap);

impl Snapshot {
    pub fn new(fields: FieldMap) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stored values of the snapshot fields that no longer match, using exact
    /// equality. A field absent from `current` compares as NULL.
    pub fn diff(&self, current: &FieldMap) -> FieldMap {
        self.0
            .iter()
            .filter_map(|(field, expected)| {
                let actual = current.get(field).cloned().unwrap_or(Value::Null);
                (!expected.exact_eq(&actual)).then(|| (field.clone(), actual))
            })
            .collect()
    }

    pub fn matches(&self, current: &FieldMap) -> bool {
        self.diff(current).is_empty()
    }
}

impl From<FieldMap> for Snapshot {
    fn from(fields: FieldMap) -> Self {
        Self(fields)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Fields to write when the snapshot still matches. May name a subset of the
/// snapshot's fields, or fields the snapshot does not carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(FieldMap);

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<FieldMap> for ChangeSet {
    fn from(fields: FieldMap) -> Self {
        Self(fields)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn stored() -> FieldMap {
        [
            ("id".to_string(), Value::Integer(43)),
            ("room_no".to_string(), Value::Null),
            ("checkout_date".to_string(), Value::Date(NaiveDate::from_ymd_opt(2020, 6, 19).unwrap())),
            ("rate".to_string(), Value::Float(99.5)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_matching_snapshot_with_date_text() {
        let snapshot: Snapshot = [
            ("id", Value::Integer(43)),
            ("room_no", Value::Null),
            ("checkout_date", Value::from("2020-06-19")),
        ]
        .into_iter()
        .collect();
        assert!(snapshot.matches(&stored()));
    }

    #[test]
    fn test_diff_reports_current_values() {
        let mut current = stored();
        current.insert("room_no".into(), Value::Integer(310));

        let snapshot: Snapshot = [("id", Value::Integer(43)), ("room_no", Value::Null)]
            .into_iter()
            .collect();
        let diff = snapshot.diff(&current);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff["room_no"], Value::Integer(310));
    }

    #[test]
    fn test_comparison_is_exact() {
        let snapshot: Snapshot = [("rate", Value::Float(99.50000001))].into_iter().collect();
        assert!(!snapshot.matches(&stored()));

        let snapshot: Snapshot = [("room_no", Value::Integer(0))].into_iter().collect();
        assert!(!snapshot.matches(&stored()));
    }

    #[test]
    fn test_large_integer_against_float_is_not_rounded() {
        let mut current = stored();
        current.insert("balance".into(), Value::Float(9_007_199_254_740_992.0));

        let snapshot: Snapshot = [("balance", Value::Integer(9_007_199_254_740_993))].into_iter().collect();
        assert!(!snapshot.matches(&current));
        assert_eq!(snapshot.diff(&current)["balance"], Value::Float(9_007_199_254_740_992.0));

        let snapshot: Snapshot = [("balance", Value::Integer(9_007_199_254_740_992))].into_iter().collect();
        assert!(snapshot.matches(&current));
    }

    #[test]
    fn test_fields_outside_snapshot_ignored() {
        let mut current = stored();
        current.insert("rate".into(), Value::Float(1.0));

        let snapshot: Snapshot = [("id", 43)].into_iter().collect();
        assert!(snapshot.matches(&current));
    }

    #[test]
    fn test_missing_field_compares_as_null() {
        let snapshot: Snapshot = [("notes", Value::Null)].into_iter().collect();
        assert!(snapshot.matches(&stored()));
        let snapshot: Snapshot = [("notes", "x")].into_iter().collect();
        assert!(!snapshot.matches(&stored()));
    }

    #[test]
    fn test_json_shape() {
        let snapshot: Snapshot =
            serde_json::from_str(r#"{"id": 43, "room_no": null, "checkout_date": "2020-06-19"}"#).unwrap();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.get("room_no").unwrap().is_null());

        let changes = ChangeSet::new().set("room_no", 309);
        assert_eq!(serde_json::to_string(&changes).unwrap(), r#"{"room_no":309}"#);
    }
}

//! Record normalization applied to every retrieved record before it is written.
//!
//! Each step takes a record by value and returns the normalized record; the
//! pipeline in [`transform_record`] chains them in a fixed order. Every step
//! only deletes or renames properties, so running the pipeline again on its
//! own output changes nothing.

use serde_json::Value;

use crate::config::JobConfig;
use crate::contract::Record;

/// Platform metadata attached to every returned record and nested object.
pub const META_ATTRIBUTE: &str = "attributes";

/// Platform-managed fields that are not portable between orgs.
pub const SYSTEM_FIELDS: &[&str] = &[
    "Id",
    "IsDeleted",
    "MasterRecordId",
    "ParentId",
    "OwnerId",
    "CreatedDate",
    "CreatedById",
    "LastModifiedDate",
    "LastModifiedById",
    "SystemModstamp",
    "LastActivityDate",
    "LastViewedDate",
    "LastReferencedDate",
];

const RELATIONSHIP_SUFFIX: &str = "__r";
const FOREIGN_KEY_SUFFIX: &str = "__c";

/// Per-job settings for [`transform_record`].
#[derive(Debug, Clone, Copy)]
pub struct TransformOptions<'a> {
    pub entity_name: &'a str,
    pub exclude_system_fields: bool,
    pub excluded_fields: &'a [String],
}

impl<'a> TransformOptions<'a> {
    pub fn for_job(job: &'a JobConfig) -> Self {
        Self {
            entity_name: &job.entity_name,
            exclude_system_fields: job.exclude_system_fields(),
            excluded_fields: job.excluded_fields(),
        }
    }
}

/// Runs the full normalization pipeline on one record.
pub fn transform_record(record: Record, options: &TransformOptions<'_>) -> Record {
    let mut record = delete_meta_attributes(record);
    if options.exclude_system_fields {
        record = delete_system_fields(record);
    }
    record = flatten_nested_objects(record);
    record = transform_relationships(record);
    if options.entity_name.eq_ignore_ascii_case("contact") {
        record = transform_contact_account_relationship(record);
    }
    delete_excluded_fields(record, options.excluded_fields)
}

/// Removes the metadata attribute at every nesting level.
pub fn delete_meta_attributes(record: Record) -> Record {
    strip_keys(record, &[META_ATTRIBUTE])
}

/// Removes [`SYSTEM_FIELDS`] at every nesting level.
pub fn delete_system_fields(record: Record) -> Record {
    strip_keys(record, SYSTEM_FIELDS)
}

/// Replaces nested objects with dotted keys, depth first.
///
/// `{"Owner": {"Name": "Bob"}}` becomes `{"Owner.Name": "Bob"}`. Arrays that
/// contain objects or arrays are flattened by index (`Contacts.0.Name`);
/// arrays of scalars are kept as they are. Flattened keys are appended after
/// the record's scalar properties. An empty nested object leaves nothing behind.
pub fn flatten_nested_objects(record: Record) -> Record {
    let mut scalars = Record::new();
    let mut flattened = Record::new();

    for (key, value) in record {
        let child = match value {
            Value::Object(child) => child,
            Value::Array(items) if items.iter().any(is_nested) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| (index.to_string(), item))
                .collect(),
            other => {
                scalars.insert(key, other);
                continue;
            }
        };
        for (child_key, child_value) in flatten_nested_objects(child) {
            flattened.insert(format!("{key}.{child_key}"), child_value);
        }
    }

    scalars.extend(flattened);
    scalars
}

/// Renames null `X__r` relationship placeholders to null `X__c` foreign keys.
///
/// The platform returns a null relationship object instead of a null foreign
/// key when no related record exists.
pub fn transform_relationships(record: Record) -> Record {
    let mut kept = Record::new();
    let mut renamed = Record::new();

    for (key, value) in record {
        if value.is_null() {
            if let Some(base) = key.strip_suffix(RELATIONSHIP_SUFFIX) {
                renamed.insert(format!("{base}{FOREIGN_KEY_SUFFIX}"), Value::Null);
                continue;
            }
        }
        kept.insert(key, value);
    }

    kept.extend(renamed);
    kept
}

/// Contact records carry their account link as `Account`; deploy expects `AccountId`.
pub fn transform_contact_account_relationship(record: Record) -> Record {
    if !record.contains_key("Account") {
        return record;
    }
    let mut account = Value::Null;
    let mut out = Record::new();
    for (key, value) in record {
        if key == "Account" {
            account = value;
        } else {
            out.insert(key, value);
        }
    }
    out.insert("AccountId".to_string(), account);
    out
}

/// Removes the named top-level fields.
pub fn delete_excluded_fields(record: Record, excluded: &[String]) -> Record {
    if excluded.is_empty() {
        return record;
    }
    record
        .into_iter()
        .filter(|(key, _)| !excluded.iter().any(|e| e == key))
        .collect()
}

fn is_nested(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

fn strip_keys(record: Record, keys: &[&str]) -> Record {
    record
        .into_iter()
        .filter(|(key, _)| !keys.contains(&key.as_str()))
        .map(|(key, value)| (key, strip_value(value, keys)))
        .collect()
}

fn strip_value(value: Value, keys: &[&str]) -> Value {
    match value {
        Value::Object(child) => Value::Object(strip_keys(child, keys)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| strip_value(item, keys))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn meta_attributes_are_removed_at_every_level() {
        let out = delete_meta_attributes(record(json!({
            "attributes": {"type": "Account"},
            "Name": "Acme",
            "Owner": {"attributes": {"type": "User"}, "Name": "Bob"},
            "Contacts": [{"attributes": {"type": "Contact"}, "LastName": "Doe"}]
        })));
        assert_eq!(
            Value::Object(out),
            json!({
                "Name": "Acme",
                "Owner": {"Name": "Bob"},
                "Contacts": [{"LastName": "Doe"}]
            })
        );
    }

    #[test]
    fn system_fields_are_removed_in_nested_objects() {
        let out = delete_system_fields(record(json!({
            "Id": "001",
            "CreatedDate": "2020-01-01",
            "Name": "Acme",
            "Parent": {"Id": "002", "Name": "Holding"}
        })));
        assert_eq!(
            Value::Object(out),
            json!({"Name": "Acme", "Parent": {"Name": "Holding"}})
        );
    }

    #[test]
    fn flattening_is_depth_first_with_dotted_keys() {
        let out = flatten_nested_objects(record(json!({
            "Name": "Acme",
            "Owner": {"Name": "Bob", "Manager": {"Email": "m@x.io"}},
            "Tags": ["a", "b"],
            "Empty": {}
        })));
        assert_eq!(
            Value::Object(out),
            json!({
                "Name": "Acme",
                "Tags": ["a", "b"],
                "Owner.Name": "Bob",
                "Owner.Manager.Email": "m@x.io"
            })
        );
    }

    #[test]
    fn arrays_of_objects_are_flattened_by_index() {
        let out = flatten_nested_objects(record(json!({
            "Contacts": [{"LastName": "Doe"}, {"LastName": "Roe"}]
        })));
        assert_eq!(
            Value::Object(out),
            json!({"Contacts.0.LastName": "Doe", "Contacts.1.LastName": "Roe"})
        );
    }

    #[test]
    fn only_null_relationships_are_renamed() {
        let out = transform_relationships(record(json!({
            "Parent__r": null,
            "Region__r": "kept",
            "Plain": null
        })));
        assert_eq!(
            Value::Object(out),
            json!({"Region__r": "kept", "Plain": null, "Parent__c": null})
        );
    }

    #[test]
    fn contact_account_is_renamed_to_account_id() {
        let out = transform_contact_account_relationship(record(json!({
            "LastName": "Doe",
            "Account": null
        })));
        assert_eq!(Value::Object(out), json!({"LastName": "Doe", "AccountId": null}));
    }

    #[test]
    fn contact_rename_applies_only_to_contact_entities() {
        let excluded: Vec<String> = vec![];
        let input = record(json!({"LastName": "Doe", "Account": null}));
        let account_options = TransformOptions {
            entity_name: "Lead",
            exclude_system_fields: true,
            excluded_fields: &excluded,
        };
        let contact_options = TransformOptions {
            entity_name: "contact",
            ..account_options
        };
        assert!(transform_record(input.clone(), &account_options).contains_key("Account"));
        assert!(transform_record(input, &contact_options).contains_key("AccountId"));
    }

    #[test]
    fn excluded_fields_are_removed_after_flattening() {
        let excluded = vec!["Owner.Name".to_string(), "Missing".to_string()];
        let options = TransformOptions {
            entity_name: "Account",
            exclude_system_fields: true,
            excluded_fields: &excluded,
        };
        let out = transform_record(
            record(json!({"Name": "Acme", "Owner": {"Name": "Bob", "Alias": "bb"}})),
            &options,
        );
        assert_eq!(Value::Object(out), json!({"Name": "Acme", "Owner.Alias": "bb"}));
    }

    #[test]
    fn system_fields_survive_when_exclusion_is_disabled() {
        let excluded: Vec<String> = vec![];
        let options = TransformOptions {
            entity_name: "Account",
            exclude_system_fields: false,
            excluded_fields: &excluded,
        };
        let out = transform_record(record(json!({"Id": "001", "Name": "Acme"})), &options);
        assert_eq!(Value::Object(out), json!({"Id": "001", "Name": "Acme"}));
    }
}

//! Plan and schema output

use std::collections::HashMap;

use colored::Colorize;

use azml_core::effect::Effect;
use azml_core::plan::Plan;
use azml_core::resource::{Resource, Value};
use azml_core::schema::ResourceSchema;

const SENSITIVE: &str = "(sensitive)";

pub fn print_plan(plan: &Plan, schemas: &HashMap<String, ResourceSchema>) {
    if plan.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for effect in plan.effects() {
        let sensitive = schemas
            .get(&effect.resource_id().resource_type)
            .map(|s| s.sensitive_attributes())
            .unwrap_or_default();
        print_effect(effect, &sensitive);
    }

    println!();
    let summary = plan.summary();
    println!(
        "Plan: {} to add, {} to change, {} to replace, {} to destroy.",
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.replace.to_string().magenta(),
        summary.delete.to_string().red()
    );
}

fn print_effect(effect: &Effect, sensitive: &[String]) {
    let attr_prefix = "      ";
    match effect {
        Effect::Create(r) => {
            println!("  {} {}", "+".green().bold(), format_address(r).cyan().bold());
            for key in sorted_keys(r.attributes.keys()) {
                println!(
                    "{}{}: {}",
                    attr_prefix,
                    key,
                    masked(key, &r.attributes[key], sensitive).green()
                );
            }
        }
        Effect::Update {
            id,
            from,
            to,
            changed_attributes,
        }
        | Effect::Replace {
            id,
            from,
            to,
            changed_attributes,
        } => {
            let symbol = if matches!(effect, Effect::Replace { .. }) {
                "-/+".magenta().bold()
            } else {
                "~".yellow().bold()
            };
            println!(
                "  {} {}.{}",
                symbol,
                id.resource_type.cyan().bold(),
                id.name.cyan().bold()
            );
            for key in sorted_keys(changed_attributes.iter()) {
                let old = from
                    .attributes
                    .get(key)
                    .map(|v| masked(key, v, sensitive))
                    .unwrap_or_else(|| "(none)".to_string());
                let new = to
                    .attributes
                    .get(key)
                    .map(|v| masked(key, v, sensitive))
                    .unwrap_or_else(|| "(none)".to_string());
                println!("{}{}: {} → {}", attr_prefix, key, old.red(), new.green());
            }
        }
        Effect::Delete { id, identifier } => {
            println!(
                "  {} {}.{}",
                "-".red().bold(),
                id.resource_type.cyan().bold(),
                id.name.cyan().bold()
            );
            println!("{}{}: {}", attr_prefix, "id".bold(), identifier.red());
        }
        Effect::Read { .. } => {}
    }
}

fn format_address(r: &Resource) -> String {
    format!("{}.{}", r.id.resource_type, r.id.name)
}

/// `name` first, the rest alphabetically
fn sorted_keys<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<&'a String> {
    let mut keys: Vec<&String> = keys.collect();
    keys.sort_by(|a, b| match (a.as_str(), b.as_str()) {
        ("name", _) => std::cmp::Ordering::Less,
        (_, "name") => std::cmp::Ordering::Greater,
        _ => a.cmp(b),
    });
    keys.dedup();
    keys
}

fn masked(key: &str, value: &Value, sensitive: &[String]) -> String {
    if sensitive.iter().any(|s| s == key) {
        SENSITIVE.to_string()
    } else {
        format_value(value)
    }
}

pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        Value::Int(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::List(items) => {
            let strs: Vec<_> = items.iter().map(format_value).collect();
            format!("[{}]", strs.join(", "))
        }
        Value::Map(map) => {
            let mut strs: Vec<_> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, format_value(v)))
                .collect();
            strs.sort();
            format!("{{{}}}", strs.join(", "))
        }
        Value::ResourceRef(binding, attr) => format!("(known after apply: {}.{})", binding, attr),
    }
}

pub fn print_schema(schema: &ResourceSchema) {
    println!("{}", schema.resource_type.cyan().bold());
    if let Some(description) = &schema.description {
        println!("  {}", description);
    }
    println!();
    for attr in schema.attributes.values() {
        let mut flags = Vec::new();
        if attr.required {
            flags.push("required".to_string());
        } else if attr.optional {
            flags.push("optional".to_string());
        }
        if attr.computed {
            flags.push("computed".to_string());
        }
        if attr.force_new {
            flags.push("force new".to_string());
        }
        if attr.sensitive {
            flags.push("sensitive".to_string());
        }
        if let Some(default) = &attr.default {
            flags.push(format!("default {}", format_value(default)));
        }
        println!(
            "  {}: {} ({})",
            attr.name.bold(),
            attr.attr_type,
            flags.join(", ").dimmed()
        );
        if let Some(description) = &attr.description {
            println!("      {}", description);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_sorts_first() {
        let keys = ["tags", "name", "location"].map(String::from);
        let sorted: Vec<&str> = sorted_keys(keys.iter()).into_iter().map(|s| s.as_str()).collect();
        assert_eq!(sorted, vec!["name", "location", "tags"]);
    }

    #[test]
    fn sensitive_values_are_masked() {
        let sensitive = vec!["account_key".to_string()];
        assert_eq!(masked("account_key", &Value::from("secret"), &sensitive), SENSITIVE);
        assert_eq!(masked("name", &Value::from("ds"), &sensitive), "\"ds\"");
    }

    #[test]
    fn unresolved_references_are_explained() {
        let value = Value::ResourceRef("ws".to_string(), "id".to_string());
        assert_eq!(format_value(&value), "(known after apply: ws.id)");
    }
}

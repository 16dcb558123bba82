//! Managed network outbound rules of a workspace
//!
//! One handler per rule type, all sharing the `outboundRules` endpoint.

use azml_core::provider::{ProviderError, ProviderResult};
use azml_core::resource::Value;
use azml_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use serde_json::json;

use super::common::{name_attr, parent_workspace, workspace_ref_attr};
use super::{ProviderContext, ResourceHandler};
use crate::arm::IdParseError;
use crate::arm::id::OutboundRuleId;
use crate::utils::{Attributes, get_bool, require_str, set_bool, set_str};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Fqdn,
    PrivateEndpoint,
    ServiceTag,
}

impl RuleKind {
    /// `type` discriminator on the wire
    pub fn wire_type(self) -> &'static str {
        match self {
            RuleKind::Fqdn => "FQDN",
            RuleKind::PrivateEndpoint => "PrivateEndpoint",
            RuleKind::ServiceTag => "ServiceTag",
        }
    }
}

pub struct OutboundRuleHandler {
    kind: RuleKind,
}

impl OutboundRuleHandler {
    pub const FQDN: OutboundRuleHandler = OutboundRuleHandler {
        kind: RuleKind::Fqdn,
    };
    pub const PRIVATE_ENDPOINT: OutboundRuleHandler = OutboundRuleHandler {
        kind: RuleKind::PrivateEndpoint,
    };
    pub const SERVICE_TAG: OutboundRuleHandler = OutboundRuleHandler {
        kind: RuleKind::ServiceTag,
    };

    fn destination(&self, attrs: &Attributes) -> ProviderResult<serde_json::Value> {
        Ok(match self.kind {
            RuleKind::Fqdn => json!(require_str(attrs, "destination_fqdn")?),
            RuleKind::PrivateEndpoint => json!({
                "serviceResourceId": require_str(attrs, "service_resource_id")?,
                "subresourceTarget": require_str(attrs, "sub_resource_target")?,
                "sparkEnabled": get_bool(attrs, "spark_enabled").unwrap_or(false),
            }),
            RuleKind::ServiceTag => json!({
                "serviceTag": require_str(attrs, "service_tag")?,
                "protocol": require_str(attrs, "protocol")?,
                "portRanges": require_str(attrs, "port_ranges")?,
            }),
        })
    }
}

impl ResourceHandler for OutboundRuleHandler {
    fn resource_type(&self) -> &'static str {
        match self.kind {
            RuleKind::Fqdn => "machine_learning_workspace_network_outbound_rule_fqdn",
            RuleKind::PrivateEndpoint => {
                "machine_learning_workspace_network_outbound_rule_private_endpoint"
            }
            RuleKind::ServiceTag => "machine_learning_workspace_network_outbound_rule_service_tag",
        }
    }

    fn schema(&self) -> ResourceSchema {
        let schema = ResourceSchema::new(self.resource_type())
            .with_description(format!(
                "{} outbound rule of a workspace managed network",
                self.kind.wire_type()
            ))
            .attribute(name_attr(types::name_matching(
                "OutboundRuleName",
                r"^[a-zA-Z0-9][a-zA-Z0-9_.-]{0,254}$",
                "rule names start with a letter or digit and contain letters, digits, '_', '.' and '-'",
            )))
            .attribute(workspace_ref_attr("workspace_id"));

        let required = |name: &str, attr_type: AttributeType| {
            AttributeSchema::new(name, attr_type).required().force_new()
        };
        match self.kind {
            RuleKind::Fqdn => {
                schema.attribute(required("destination_fqdn", types::non_empty_string()))
            }
            RuleKind::PrivateEndpoint => schema
                .attribute(required("service_resource_id", types::azure_resource_id()))
                .attribute(required("sub_resource_target", types::non_empty_string()))
                .attribute(
                    AttributeSchema::new("spark_enabled", AttributeType::Bool)
                        .with_default(false)
                        .force_new(),
                ),
            RuleKind::ServiceTag => schema
                .attribute(required("service_tag", types::non_empty_string()))
                .attribute(required(
                    "protocol",
                    AttributeType::Enum(
                        ["*", "TCP", "UDP", "ICMP"].iter().map(|s| s.to_string()).collect(),
                    ),
                ))
                .attribute(required("port_ranges", types::non_empty_string())),
        }
    }

    fn resource_id(&self, attrs: &Attributes, _ctx: &ProviderContext) -> ProviderResult<String> {
        let workspace = parent_workspace(attrs, "workspace_id")?;
        Ok(OutboundRuleId::new(
            workspace.subscription_id,
            workspace.resource_group_name,
            workspace.workspace_name,
            require_str(attrs, "name")?,
        )
        .to_string())
    }

    fn validate_id(&self, id: &str) -> Result<(), IdParseError> {
        OutboundRuleId::parse(id).map(|_| ())
    }

    fn expand(
        &self,
        attrs: &Attributes,
        _ctx: &ProviderContext,
    ) -> ProviderResult<serde_json::Value> {
        Ok(json!({
            "properties": {
                "type": self.kind.wire_type(),
                "category": "UserDefined",
                "destination": self.destination(attrs)?,
            }
        }))
    }

    fn flatten(
        &self,
        id: &str,
        body: &serde_json::Value,
        _ctx: &ProviderContext,
    ) -> ProviderResult<Attributes> {
        let parsed = OutboundRuleId::parse(id)
            .map_err(|e| ProviderError::new(e.to_string()).with_cause(e))?;
        let wire_type = body.pointer("/properties/type").and_then(|t| t.as_str());
        if let Some(t) = wire_type
            && !t.eq_ignore_ascii_case(self.kind.wire_type())
        {
            return Err(ProviderError::validation(format!(
                "outbound rule {} has type {:?}, not {:?}",
                id,
                t,
                self.kind.wire_type()
            )));
        }

        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), Value::from(parsed.outbound_rule_name.as_str()));
        attrs.insert(
            "workspace_id".to_string(),
            Value::from(parsed.workspace_id().to_string()),
        );

        let destination = body.pointer("/properties/destination");
        match self.kind {
            RuleKind::Fqdn => set_str(&mut attrs, "destination_fqdn", destination),
            RuleKind::PrivateEndpoint => {
                if let Some(d) = destination {
                    set_str(&mut attrs, "service_resource_id", d.get("serviceResourceId"));
                    set_str(&mut attrs, "sub_resource_target", d.get("subresourceTarget"));
                    set_bool(&mut attrs, "spark_enabled", d.get("sparkEnabled"));
                }
            }
            RuleKind::ServiceTag => {
                if let Some(d) = destination {
                    set_str(&mut attrs, "service_tag", d.get("serviceTag"));
                    set_str(&mut attrs, "protocol", d.get("protocol"));
                    set_str(&mut attrs, "port_ranges", d.get("portRanges"));
                }
            }
        }
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Features;

    const WS: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.MachineLearningServices/workspaces/ws";

    fn ctx() -> ProviderContext {
        ProviderContext {
            subscription_id: "sub".to_string(),
            features: Features::default(),
            storage_endpoint_suffix: "core.windows.net".to_string(),
        }
    }

    fn base(name: &str) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), Value::from(name));
        attrs.insert("workspace_id".to_string(), Value::from(WS));
        attrs
    }

    #[test]
    fn fqdn_rule() {
        let mut attrs = base("pypi");
        attrs.insert("destination_fqdn".to_string(), Value::from("pypi.org"));
        let handler = OutboundRuleHandler::FQDN;
        assert!(handler.schema().validate(&attrs).is_ok());

        let body = handler.expand(&attrs, &ctx()).unwrap();
        assert_eq!(
            body,
            json!({ "properties": { "type": "FQDN", "category": "UserDefined", "destination": "pypi.org" } })
        );
        let id = handler.resource_id(&attrs, &ctx()).unwrap();
        assert_eq!(id, format!("{}/outboundRules/pypi", WS));
        assert_eq!(handler.flatten(&id, &body, &ctx()).unwrap(), attrs);
    }

    #[test]
    fn private_endpoint_rule() {
        let mut attrs = base("storage");
        attrs.insert(
            "service_resource_id".to_string(),
            Value::from("/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/sa"),
        );
        attrs.insert("sub_resource_target".to_string(), Value::from("blob"));
        attrs.insert("spark_enabled".to_string(), Value::Bool(false));
        let handler = OutboundRuleHandler::PRIVATE_ENDPOINT;
        assert!(handler.schema().validate(&attrs).is_ok());

        let body = handler.expand(&attrs, &ctx()).unwrap();
        assert_eq!(body["properties"]["destination"]["subresourceTarget"], "blob");
        let id = handler.resource_id(&attrs, &ctx()).unwrap();
        assert_eq!(handler.flatten(&id, &body, &ctx()).unwrap(), attrs);
    }

    #[test]
    fn service_tag_rule_requires_all_fields() {
        let mut attrs = base("aad");
        attrs.insert("service_tag".to_string(), Value::from("AzureActiveDirectory"));
        attrs.insert("protocol".to_string(), Value::from("TCP"));
        let handler = OutboundRuleHandler::SERVICE_TAG;
        assert!(handler.schema().validate(&attrs).is_err());
        assert!(handler.expand(&attrs, &ctx()).is_err());

        attrs.insert("port_ranges".to_string(), Value::from("80,443"));
        assert!(handler.schema().validate(&attrs).is_ok());
        let body = handler.expand(&attrs, &ctx()).unwrap();
        assert_eq!(body["properties"]["destination"]["portRanges"], "80,443");
    }

    #[test]
    fn flatten_rejects_other_rule_types() {
        let id = format!("{}/outboundRules/pypi", WS);
        let body = json!({ "properties": { "type": "FQDN", "destination": "pypi.org" } });
        assert!(
            OutboundRuleHandler::SERVICE_TAG
                .flatten(&id, &body, &ctx())
                .is_err()
        );
    }

    #[test]
    fn handlers_have_distinct_types() {
        assert_ne!(
            OutboundRuleHandler::FQDN.resource_type(),
            OutboundRuleHandler::SERVICE_TAG.resource_type()
        );
    }
}

//! Change notification types shared by the bus, the push client and the views

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::view::PageQuery;

/// The kind of record a list view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Organization,
    Person,
    /// Bulk-import job history
    Import,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Product,
        EntityKind::Organization,
        EntityKind::Person,
        EntityKind::Import,
    ];

    /// Canonical subscription key, also used in locally published bus names.
    pub fn key(self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Organization => "organization",
            EntityKind::Person => "person",
            EntityKind::Import => "imports",
        }
    }

    /// Every name this kind answers to, canonical key first.
    ///
    /// `org` and `import` are legacy spellings still emitted by older pages
    /// and by the import service; see DESIGN.md before trimming this list.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            EntityKind::Product => &["product"],
            EntityKind::Organization => &["organization", "org"],
            EntityKind::Person => &["person"],
            EntityKind::Import => &["imports", "import"],
        }
    }

    /// REST collection path (without leading slash).
    pub fn path(self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Organization => "organization",
            EntityKind::Person => "person",
            EntityKind::Import => "import",
        }
    }

    /// Filter fields the list endpoint understands.
    pub fn filter_fields(self) -> &'static [&'static str] {
        match self {
            EntityKind::Product => &[
                "name",
                "partNumber",
                "unit",
                "organizationName",
                "personName",
            ],
            EntityKind::Organization => &["name", "fullName", "officialTownName", "postalTownName"],
            EntityKind::Person => &[
                "name",
                "eyeColor",
                "hairColor",
                "nationality",
                "locationName",
            ],
            EntityKind::Import => &[],
        }
    }

    /// Initial query of a freshly mounted view.
    pub fn default_query(self) -> PageQuery {
        match self {
            EntityKind::Import => PageQuery::new(20, "id", crate::view::SortDir::Desc),
            _ => PageQuery::new(5, "id", crate::view::SortDir::Asc),
        }
    }

    /// Case-insensitive match against the canonical key and legacy aliases.
    ///
    /// A trailing `:<suffix>` (as in `organization:changed`) is ignored.
    pub fn matches(self, name: &str) -> bool {
        let name = name.split(':').next().unwrap_or_default().trim();
        self.aliases()
            .iter()
            .any(|alias| alias.eq_ignore_ascii_case(name))
    }

    /// Resolve a name or alias to a kind.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.matches(name))
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| {
            format!(
                "unknown entity '{}' (expected product, organization, person or imports)",
                s
            )
        })
    }
}

/// The mutation a change event reports
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
    /// Anything else the server or a peer sent; never triggers a reload
    Other(String),
}

impl ChangeAction {
    /// Parse case-insensitively. `changed` is the bus spelling of `updated`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => ChangeAction::Created,
            "updated" | "changed" => ChangeAction::Updated,
            "deleted" => ChangeAction::Deleted,
            other => ChangeAction::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ChangeAction::Created => "created",
            ChangeAction::Updated => "updated",
            ChangeAction::Deleted => "deleted",
            ChangeAction::Other(s) => s,
        }
    }

    /// Whether this action can invalidate a list view.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, ChangeAction::Other(_))
    }
}

impl Serialize for ChangeAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChangeAction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ChangeAction::parse(&raw))
    }
}

/// A record changed somewhere: in this process, in a peer instance or on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Entity name as sent by the producer (not normalized)
    #[serde(alias = "type")]
    pub entity: String,
    #[serde(alias = "event")]
    pub action: ChangeAction,
    /// Optional producer data (the server sends the record id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ChangeEvent {
    pub fn new(entity: impl Into<String>, action: ChangeAction) -> Self {
        Self {
            entity: entity.into(),
            action,
            payload: None,
        }
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Parse a bus event name such as `org:deleted` or `product:changed`.
    ///
    /// Names without an action suffix are not change notifications.
    pub fn from_bus_name(name: &str, payload: &Value) -> Option<Self> {
        let (entity, action) = name.split_once(':')?;
        if entity.trim().is_empty() {
            return None;
        }
        let event = ChangeEvent::new(entity.trim(), ChangeAction::parse(action));
        Some(if payload.is_null() {
            event
        } else {
            event.with_payload(payload.clone())
        })
    }

    /// Read a server push body: `{entity|type, action|event, id?, payload?}`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let entity = obj
            .get("entity")
            .or_else(|| obj.get("type"))
            .and_then(Value::as_str)?;
        let action = obj
            .get("action")
            .or_else(|| obj.get("event"))
            .and_then(Value::as_str)?;
        let payload = obj
            .get("payload")
            .or_else(|| obj.get("id"))
            .filter(|v| !v.is_null())
            .cloned();
        Some(Self {
            entity: entity.to_string(),
            action: ChangeAction::parse(action),
            payload,
        })
    }

    /// Whether a view of `kind` must reload because of this event.
    pub fn concerns(&self, kind: EntityKind) -> bool {
        self.action.is_mutation() && kind.matches(&self.entity)
    }

    /// The bus name a local publisher uses for this event.
    pub fn bus_name(&self) -> String {
        let action = match self.action {
            ChangeAction::Updated | ChangeAction::Created => "changed",
            ChangeAction::Deleted => "deleted",
            ChangeAction::Other(ref other) => other.as_str(),
        };
        format!("{}:{}", self.entity, action)
    }
}

/// One frame received from the server push channel.
///
/// Frames that are not structured change events are still delivered; the
/// subscriber decides whether they matter.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Change(ChangeEvent),
    Raw(Value),
}

impl PushMessage {
    /// Parse a frame body. Invalid JSON becomes `Raw(Value::String(body))`.
    pub fn parse(body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => match ChangeEvent::from_value(&value) {
                Some(event) => PushMessage::Change(event),
                None => PushMessage::Raw(value),
            },
            Err(_) => PushMessage::Raw(Value::String(body.to_string())),
        }
    }

    pub fn as_change(&self) -> Option<&ChangeEvent> {
        match self {
            PushMessage::Change(event) => Some(event),
            PushMessage::Raw(_) => None,
        }
    }
}

/// A ChangeBus publish as carried by a broadcast transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    #[serde(rename = "type")]
    pub name: String,
    #[serde(default)]
    pub payload: Value,
    /// Bus instance that published the message
    pub origin: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_matches_aliases_case_insensitively() {
        assert!(EntityKind::Organization.matches("organization"));
        assert!(EntityKind::Organization.matches("ORG"));
        assert!(EntityKind::Organization.matches("Organization:changed"));
        assert!(EntityKind::Import.matches("imports"));
        assert!(EntityKind::Import.matches("Import"));
        assert!(!EntityKind::Person.matches("organization"));
        assert!(!EntityKind::Product.matches("products"));
    }

    #[test]
    fn test_entity_from_str() {
        assert_eq!("org".parse::<EntityKind>().unwrap(), EntityKind::Organization);
        assert_eq!("Person".parse::<EntityKind>().unwrap(), EntityKind::Person);
        assert!("widget".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_default_queries() {
        let products = EntityKind::Product.default_query();
        assert_eq!(products.size, 5);
        assert_eq!(products.sort, "id");

        let imports = EntityKind::Import.default_query();
        assert_eq!(imports.size, 20);
        assert_eq!(imports.dir, crate::view::SortDir::Desc);
    }

    #[test]
    fn test_change_action_parse() {
        assert_eq!(ChangeAction::parse("CREATED"), ChangeAction::Created);
        assert_eq!(ChangeAction::parse("changed"), ChangeAction::Updated);
        assert_eq!(ChangeAction::parse(" deleted "), ChangeAction::Deleted);
        assert_eq!(
            ChangeAction::parse("archived"),
            ChangeAction::Other("archived".into())
        );
        assert!(!ChangeAction::parse("archived").is_mutation());
    }

    #[test]
    fn test_from_bus_name() {
        let event = ChangeEvent::from_bus_name("org:deleted", &Value::Null).unwrap();
        assert_eq!(event.entity, "org");
        assert_eq!(event.action, ChangeAction::Deleted);
        assert!(event.payload.is_none());
        assert!(event.concerns(EntityKind::Organization));

        assert!(ChangeEvent::from_bus_name("refresh", &Value::Null).is_none());
        assert!(ChangeEvent::from_bus_name(":changed", &Value::Null).is_none());
    }

    #[test]
    fn test_from_value_accepts_legacy_keys() {
        let event = ChangeEvent::from_value(&json!({"type": "person", "event": "updated"})).unwrap();
        assert_eq!(event.entity, "person");
        assert_eq!(event.action, ChangeAction::Updated);

        let event =
            ChangeEvent::from_value(&json!({"entity": "product", "action": "created", "id": 7}))
                .unwrap();
        assert_eq!(event.payload, Some(json!(7)));

        assert!(ChangeEvent::from_value(&json!({"entity": "product"})).is_none());
        assert!(ChangeEvent::from_value(&json!([1, 2])).is_none());
    }

    #[test]
    fn test_concerns_requires_mutation() {
        let event = ChangeEvent::new("organization", ChangeAction::Created);
        assert!(event.concerns(EntityKind::Organization));
        assert!(!event.concerns(EntityKind::Person));

        let other = ChangeEvent::new("organization", ChangeAction::Other("viewed".into()));
        assert!(!other.concerns(EntityKind::Organization));
    }

    #[test]
    fn test_push_message_parse() {
        let msg = PushMessage::parse(r#"{"entity":"organization","action":"created","id":3}"#);
        assert!(matches!(msg, PushMessage::Change(ref e) if e.entity == "organization"));

        let msg = PushMessage::parse(r#"{"hello":"world"}"#);
        assert_eq!(msg, PushMessage::Raw(json!({"hello": "world"})));

        let msg = PushMessage::parse("not json {");
        assert_eq!(msg, PushMessage::Raw(Value::String("not json {".into())));
        assert!(msg.as_change().is_none());
    }

    #[test]
    fn test_bus_name() {
        assert_eq!(
            ChangeEvent::new("product", ChangeAction::Created).bus_name(),
            "product:changed"
        );
        assert_eq!(
            ChangeEvent::new("org", ChangeAction::Deleted).bus_name(),
            "org:deleted"
        );
    }

    #[test]
    fn test_bus_message_wire_shape() {
        let origin = Uuid::new_v4();
        let msg = BusMessage {
            name: "person:changed".into(),
            payload: Value::Null,
            origin,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "person:changed");
        let back: BusMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::metadata::{Fact, InstanceMetadata};

/// Reply sent when the message matches no registered trigger.
pub const FALLBACK_TEXT: &str =
    "I didn't understand that command. Type `help` for a list of my commands.";

/// Reply sent when a metadata read fails mid-resolution.
pub const APOLOGY_TEXT: &str =
    "An error occurred while processing your request. Please try again later.";

const HELP_TEXT: &str = "# __Here is a list of my commands:__\n\
    hello/hi: Greets the user\n\
    bye: Says goodbye\n\
    region: Returns the Region of the EC2 Server\n\
    ip: Returns the Public IP of the EC2 Server\n\
    zone: Returns the Availability Zone of the EC2 Server\n\
    id: Returns the EC2 Instance ID\n\
    type: Returns the type of the Current Running Instance\n\
    tell me about my server!: Describes where this instance is running";

/// One inbound chat message, as delivered by the transport.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub author_id: String,
    pub channel_name: String,
    pub raw_text: String,
}

/// Outcome of resolving one message. Exactly one is produced per message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedResponse {
    /// Text to send back to the originating conversation.
    Reply(String),
    /// No trigger matched; renders as the fixed fallback text.
    Unrecognized,
    /// Message came from the bot itself; nothing is sent.
    Ignored,
}

impl ResolvedResponse {
    /// The text to hand to the transport, if any.
    pub fn into_text(self) -> Option<String> {
        match self {
            ResolvedResponse::Reply(text) => Some(text),
            ResolvedResponse::Unrecognized => Some(FALLBACK_TEXT.to_string()),
            ResolvedResponse::Ignored => None,
        }
    }
}

/// How a command produces its reply text.
pub enum ResponseKind {
    /// Fixed template; `{username}` is replaced with the sender's short name.
    Static(&'static str),
    /// Single metadata fact appended to a fixed prefix.
    Metadata { prefix: &'static str, fact: Fact },
    /// Template combining several metadata facts, keyed as `{fact_key}`.
    Composite {
        template: &'static str,
        facts: &'static [Fact],
    },
}

/// One recognized user intent.
pub struct Command {
    pub triggers: &'static [&'static str],
    pub response: ResponseKind,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate trigger phrase `{0}`")]
    DuplicateTrigger(String),
}

/// Mapping from normalized trigger phrase to command. Populated once at
/// startup, read-only afterwards.
#[derive(Default)]
pub struct CommandTable {
    commands: Vec<Command>,
    index: HashMap<String, usize>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a command under all of its trigger phrases. Fails without
    /// modifying the table if any normalized trigger is already claimed.
    pub fn register(&mut self, command: Command) -> Result<(), RegistryError> {
        let normalized: Vec<String> =
            command.triggers.iter().map(|t| normalize(t)).collect();
        for (i, trigger) in normalized.iter().enumerate() {
            if self.index.contains_key(trigger) || normalized[..i].contains(trigger) {
                return Err(RegistryError::DuplicateTrigger(trigger.clone()));
            }
        }
        let slot = self.commands.len();
        self.commands.push(command);
        for trigger in normalized {
            self.index.insert(trigger, slot);
        }
        Ok(())
    }

    pub fn get(&self, normalized_trigger: &str) -> Option<&Command> {
        self.index
            .get(normalized_trigger)
            .map(|&slot| &self.commands[slot])
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Maps one inbound message to exactly one response, consulting the metadata
/// facade only for commands that need it. Sending is the transport's job.
pub struct Resolver {
    table: CommandTable,
    self_id: String,
}

impl Resolver {
    pub fn new(table: CommandTable, self_id: impl Into<String>) -> Self {
        Self {
            table,
            self_id: self_id.into(),
        }
    }

    pub async fn resolve(
        &self,
        message: &IncomingMessage,
        metadata: &dyn InstanceMetadata,
    ) -> ResolvedResponse {
        if message.author_id == self.self_id {
            return ResolvedResponse::Ignored;
        }

        let trigger = normalize(&message.raw_text);
        let Some(command) = self.table.get(&trigger) else {
            debug!(trigger = %trigger, "No matching command");
            return ResolvedResponse::Unrecognized;
        };

        match &command.response {
            ResponseKind::Static(template) => ResolvedResponse::Reply(
                template.replace("{username}", username(&message.author_id)),
            ),
            ResponseKind::Metadata { prefix, fact } => match metadata.fetch(*fact).await {
                Ok(value) => ResolvedResponse::Reply(format!("{prefix}{value}")),
                Err(e) => {
                    warn!(fact = fact.key(), error = %e, "Metadata read failed");
                    ResolvedResponse::Reply(APOLOGY_TEXT.to_string())
                }
            },
            ResponseKind::Composite { template, facts } => {
                let mut text = template.to_string();
                for fact in *facts {
                    match metadata.fetch(*fact).await {
                        Ok(value) => {
                            text = text.replace(&format!("{{{}}}", fact.key()), &value);
                        }
                        Err(e) => {
                            warn!(fact = fact.key(), error = %e, "Metadata read failed");
                            return ResolvedResponse::Reply(APOLOGY_TEXT.to_string());
                        }
                    }
                }
                ResolvedResponse::Reply(text)
            }
        }
    }
}

/// Trigger normalization: surrounding whitespace trimmed, lowercased.
fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Short display name: the part of the author identifier before any
/// discriminator separator (`Alice#0001` -> `Alice`, `@alice:host` -> `alice`).
pub fn username(author_id: &str) -> &str {
    let local = author_id.strip_prefix('@').unwrap_or(author_id);
    local.split(['#', ':']).next().unwrap_or(local)
}

/// Builds the fixed command surface.
pub fn default_table() -> Result<CommandTable, RegistryError> {
    let mut table = CommandTable::new();
    table.register(Command {
        triggers: &["hello", "hi", "hello world"],
        response: ResponseKind::Static("Hello {username}!"),
    })?;
    table.register(Command {
        triggers: &["bye"],
        response: ResponseKind::Static("Bye {username}!"),
    })?;
    table.register(Command {
        triggers: &["region"],
        response: ResponseKind::Metadata {
            prefix: "Here is the EC2 Instance Region: ",
            fact: Fact::Region,
        },
    })?;
    table.register(Command {
        triggers: &["ip"],
        response: ResponseKind::Metadata {
            prefix: "Here is the public EC2 Instance IP: ",
            fact: Fact::PublicIpv4,
        },
    })?;
    table.register(Command {
        triggers: &["zone"],
        response: ResponseKind::Metadata {
            prefix: "Here is the EC2 Instance Availability Zone: ",
            fact: Fact::AvailabilityZone,
        },
    })?;
    table.register(Command {
        triggers: &["id"],
        response: ResponseKind::Metadata {
            prefix: "Here is the EC2 Instance ID: ",
            fact: Fact::InstanceId,
        },
    })?;
    table.register(Command {
        triggers: &["type"],
        response: ResponseKind::Metadata {
            prefix: "Here is the type of Instance Currently Running: ",
            fact: Fact::InstanceType,
        },
    })?;
    table.register(Command {
        triggers: &["tell me about my server!"],
        response: ResponseKind::Composite {
            template: "The EC2 instance is located in {availability_zone} \
                within the {region} region.",
            facts: &[Fact::AvailabilityZone, Fact::Region],
        },
    })?;
    table.register(Command {
        triggers: &["help"],
        response: ResponseKind::Static(HELP_TEXT),
    })?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataError;
    use async_trait::async_trait;
    use reqwest::StatusCode;

    struct FixedMetadata;

    #[async_trait]
    impl InstanceMetadata for FixedMetadata {
        async fn fetch(&self, fact: Fact) -> Result<String, MetadataError> {
            Ok(match fact {
                Fact::Region => "us-east-1",
                Fact::PublicIpv4 => "203.0.113.10",
                Fact::AvailabilityZone => "us-east-1a",
                Fact::InstanceId => "i-0123456789abcdef0",
                Fact::InstanceType => "t3.micro",
            }
            .to_string())
        }
    }

    struct FailingMetadata;

    #[async_trait]
    impl InstanceMetadata for FailingMetadata {
        async fn fetch(&self, fact: Fact) -> Result<String, MetadataError> {
            Err(MetadataError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                path: fact.path(),
            })
        }
    }

    fn resolver() -> Resolver {
        Resolver::new(default_table().unwrap(), "@metabot:example.org")
    }

    fn message(author: &str, text: &str) -> IncomingMessage {
        IncomingMessage {
            author_id: author.to_string(),
            channel_name: "general".to_string(),
            raw_text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn hi_greets_by_short_username() {
        let response = resolver()
            .resolve(&message("Alice#0001", "Hi"), &FixedMetadata)
            .await;
        assert_eq!(response, ResolvedResponse::Reply("Hello Alice!".to_string()));
    }

    #[tokio::test]
    async fn matrix_style_sender_uses_localpart() {
        let response = resolver()
            .resolve(&message("@alice:example.org", "bye"), &FixedMetadata)
            .await;
        assert_eq!(response, ResolvedResponse::Reply("Bye alice!".to_string()));
    }

    #[tokio::test]
    async fn casing_and_whitespace_variants_match_canonical_form() {
        let resolver = resolver();
        let canonical = resolver
            .resolve(&message("@alice:example.org", "region"), &FixedMetadata)
            .await;
        for variant in ["REGION", "  region  ", "Region", "\tREGION\n"] {
            let response = resolver
                .resolve(&message("@alice:example.org", variant), &FixedMetadata)
                .await;
            assert_eq!(response, canonical, "variant {variant:?} diverged");
        }
    }

    #[tokio::test]
    async fn region_reply_embeds_fact() {
        let response = resolver()
            .resolve(&message("@alice:example.org", "region"), &FixedMetadata)
            .await;
        assert_eq!(
            response,
            ResolvedResponse::Reply("Here is the EC2 Instance Region: us-east-1".to_string())
        );
    }

    #[tokio::test]
    async fn composite_combines_zone_and_region() {
        let response = resolver()
            .resolve(
                &message("@alice:example.org", "Tell me about my server!"),
                &FixedMetadata,
            )
            .await;
        assert_eq!(
            response,
            ResolvedResponse::Reply(
                "The EC2 instance is located in us-east-1a within the us-east-1 region."
                    .to_string()
            )
        );
    }

    #[tokio::test]
    async fn metadata_failure_yields_apology_not_error() {
        let resolver = resolver();
        for trigger in ["region", "ip", "zone", "id", "type", "tell me about my server!"] {
            let response = resolver
                .resolve(&message("@alice:example.org", trigger), &FailingMetadata)
                .await;
            assert_eq!(
                response,
                ResolvedResponse::Reply(APOLOGY_TEXT.to_string()),
                "trigger {trigger:?}"
            );
        }
    }

    #[tokio::test]
    async fn unknown_text_yields_exactly_the_fallback() {
        let response = resolver()
            .resolve(&message("@alice:example.org", "banana"), &FixedMetadata)
            .await;
        assert_eq!(response, ResolvedResponse::Unrecognized);
        assert_eq!(response.into_text().as_deref(), Some(FALLBACK_TEXT));
    }

    #[tokio::test]
    async fn own_messages_are_ignored_with_nothing_to_send() {
        let response = resolver()
            .resolve(&message("@metabot:example.org", "hello"), &FixedMetadata)
            .await;
        assert_eq!(response, ResolvedResponse::Ignored);
        assert_eq!(response.into_text(), None);
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let resolver = resolver();
        let msg = message("@alice:example.org", "type");
        let first = resolver.resolve(&msg, &FixedMetadata).await;
        let second = resolver.resolve(&msg, &FixedMetadata).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn help_mentions_every_primary_trigger() {
        let response = resolver()
            .resolve(&message("@alice:example.org", "help"), &FixedMetadata)
            .await;
        let ResolvedResponse::Reply(text) = response else {
            panic!("help did not produce a reply");
        };
        for trigger in [
            "hello",
            "hi",
            "bye",
            "region",
            "ip",
            "zone",
            "id",
            "type",
            "tell me about my server!",
        ] {
            assert!(text.contains(trigger), "help text is missing {trigger:?}");
        }
    }

    #[test]
    fn duplicate_registration_fails_and_leaves_table_unchanged() {
        let mut table = CommandTable::new();
        table
            .register(Command {
                triggers: &["ping"],
                response: ResponseKind::Static("Pong!"),
            })
            .unwrap();

        let err = table
            .register(Command {
                triggers: &["pong", "PING"],
                response: ResponseKind::Static("nope"),
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTrigger(ref t) if t.as_str() == "ping"));

        // Atomic failure: the non-conflicting trigger was not inserted either.
        assert!(!table.is_empty());
        assert_eq!(table.len(), 1);
        assert!(table.get("pong").is_none());
        assert!(table.get("ping").is_some());
    }

    #[test]
    fn username_handles_both_identifier_styles() {
        assert_eq!(username("Alice#0001"), "Alice");
        assert_eq!(username("@alice:example.org"), "alice");
        assert_eq!(username("bob"), "bob");
    }
}

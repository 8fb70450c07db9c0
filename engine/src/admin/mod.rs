//! Management-plane client for the namespace ATOM API.
//!
//! Entity listings, runtime counters and subscription/rule management go over
//! HTTPS with SAS authorization; the AMQP data plane never exposes these.

mod atom;

pub use atom::CountDetails;

use crate::auth::{ParsedConnectionString, SasTokenGenerator};
use crate::entity::EntityRef;
use crate::error::{ServiceBusResult, from_status, translate};
use atom::FeedEntry;

const API_VERSION: &str = "api-version=2017-04";
const PAGE_SIZE: usize = 100;
const TOKEN_VALIDITY_MINUTES: i64 = 20;

/// A queue as listed by the management API.
#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub name: String,
    pub counts: CountDetails,
    pub requires_session: bool,
    pub max_delivery_count: Option<i64>,
    pub status: Option<String>,
    pub partitioned: bool,
    pub size_in_bytes: i64,
}

#[derive(Debug, Clone)]
pub struct TopicInfo {
    pub name: String,
    pub status: Option<String>,
    pub partitioned: bool,
    pub size_in_bytes: i64,
}

#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub topic: String,
    pub name: String,
    pub counts: CountDetails,
    pub requires_session: bool,
    pub max_delivery_count: Option<i64>,
    pub status: Option<String>,
}

/// Subscription fields settable over the management API. Unset fields are
/// left to broker defaults on create; an update replaces the description, so
/// callers pass the full desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSettings {
    /// ISO 8601 duration, e.g. `PT1M`.
    pub lock_duration: Option<String>,
    pub requires_session: Option<bool>,
    /// ISO 8601 duration.
    pub default_message_time_to_live: Option<String>,
    pub dead_letter_on_expiration: Option<bool>,
    pub max_delivery_count: Option<i64>,
    pub status: Option<String>,
    pub forward_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleFilter {
    /// Matches everything; the broker stores it as SQL `1=1`.
    True,
    Sql(String),
    Correlation(String),
}

#[derive(Debug, Clone)]
pub struct RuleInfo {
    pub name: String,
    pub filter: RuleFilter,
    pub action_sql: Option<String>,
}

/// SAS-authenticated HTTP client for one namespace.
#[derive(Clone)]
pub struct AdminClient {
    http: reqwest::Client,
    base_url: String,
    key_name: String,
    key: String,
    sas: SasTokenGenerator,
}

impl AdminClient {
    pub fn from_connection_string(connection_string: &str) -> ServiceBusResult<Self> {
        let parsed = ParsedConnectionString::parse(connection_string)?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: parsed.management_base_url(),
            sas: SasTokenGenerator::new(parsed.fully_qualified_namespace.clone()),
            key_name: parsed.key_name,
            key: parsed.key,
        })
    }

    fn token(&self) -> ServiceBusResult<String> {
        self.sas
            .generate_sas_token(&self.key_name, &self.key, TOKEN_VALIDITY_MINUTES)
    }

    async fn get(&self, path: &str, query: &str) -> ServiceBusResult<String> {
        let url = format!("{}/{path}?{API_VERSION}{query}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.token()?)
            .send()
            .await
            .map_err(|e| translate(&format!("querying management API at '{path}'"), e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| translate(&format!("reading management response for '{path}'"), e))?;
        if status >= 400 {
            return Err(from_status(
                &format!("management query for '{path}'"),
                status,
                &body,
            ));
        }
        Ok(body)
    }

    async fn put(&self, path: &str, body: String, update: bool) -> ServiceBusResult<String> {
        let url = format!("{}/{path}?{API_VERSION}", self.base_url);
        let mut request = self
            .http
            .put(&url)
            .header("Authorization", self.token()?)
            .header("Content-Type", "application/atom+xml;type=entry;charset=utf-8");
        if update {
            // Without If-Match the broker treats the PUT as a create and
            // rejects it with a conflict when the entity exists.
            request = request.header("If-Match", "*");
        }
        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| translate(&format!("creating '{path}'"), e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| translate(&format!("reading create response for '{path}'"), e))?;
        if status >= 400 {
            return Err(from_status(&format!("creating '{path}'"), status, &body));
        }
        Ok(body)
    }

    async fn delete(&self, path: &str) -> ServiceBusResult<()> {
        let url = format!("{}/{path}?{API_VERSION}", self.base_url);
        let response = self
            .http
            .delete(&url)
            .header("Authorization", self.token()?)
            .send()
            .await
            .map_err(|e| translate(&format!("deleting '{path}'"), e))?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(from_status(&format!("deleting '{path}'"), status, &body));
        }
        Ok(())
    }

    /// Fetches every page of a resource feed. The API caps feeds at 100
    /// entries, so listings walk `$skip` until a short page comes back.
    async fn get_all_pages(&self, path: &str) -> ServiceBusResult<Vec<String>> {
        let mut pages = Vec::new();
        let mut skip = 0usize;
        loop {
            let query = format!("&$skip={skip}&$top={PAGE_SIZE}");
            let xml = self.get(path, &query).await?;
            let page_len = FeedEntry::split(&xml).len();
            pages.push(xml);
            if page_len < PAGE_SIZE {
                break;
            }
            skip += PAGE_SIZE;
        }
        Ok(pages)
    }

    pub async fn list_queues(&self) -> ServiceBusResult<Vec<QueueInfo>> {
        let pages = self.get_all_pages("$Resources/Queues").await?;
        let mut queues = Vec::new();
        for page in &pages {
            for entry in FeedEntry::split(page) {
                queues.push(queue_from_entry(&entry));
            }
        }
        log::debug!("listed {} queues", queues.len());
        Ok(queues)
    }

    pub async fn list_topics(&self) -> ServiceBusResult<Vec<TopicInfo>> {
        let pages = self.get_all_pages("$Resources/Topics").await?;
        let mut topics = Vec::new();
        for page in &pages {
            for entry in FeedEntry::split(page) {
                topics.push(TopicInfo {
                    name: entry.title(),
                    status: entry.text("Status"),
                    partitioned: entry.flag("EnablePartitioning").unwrap_or(false),
                    size_in_bytes: entry.number("SizeInBytes").unwrap_or(0),
                });
            }
        }
        log::debug!("listed {} topics", topics.len());
        Ok(topics)
    }

    pub async fn list_subscriptions(&self, topic: &str) -> ServiceBusResult<Vec<SubscriptionInfo>> {
        let pages = self.get_all_pages(&format!("{topic}/Subscriptions")).await?;
        let mut subscriptions = Vec::new();
        for page in &pages {
            for entry in FeedEntry::split(page) {
                subscriptions.push(subscription_from_entry(topic, &entry));
            }
        }
        Ok(subscriptions)
    }

    pub async fn get_queue(&self, name: &str) -> ServiceBusResult<QueueInfo> {
        let xml = self.get(name, "").await?;
        let entries = FeedEntry::split(&xml);
        let entry = entries.first().ok_or_else(|| {
            crate::error::ServiceBusError::ResourceNotFound(format!("queue '{name}'"))
        })?;
        let mut queue = queue_from_entry(entry);
        if queue.name.is_empty() {
            queue.name = name.to_string();
        }
        Ok(queue)
    }

    pub async fn get_topic(&self, name: &str) -> ServiceBusResult<TopicInfo> {
        let xml = self.get(name, "").await?;
        let entries = FeedEntry::split(&xml);
        let entry = entries.first().ok_or_else(|| {
            crate::error::ServiceBusError::ResourceNotFound(format!("topic '{name}'"))
        })?;
        let mut title = entry.title();
        if title.is_empty() {
            title = name.to_string();
        }
        Ok(TopicInfo {
            name: title,
            status: entry.text("Status"),
            partitioned: entry.flag("EnablePartitioning").unwrap_or(false),
            size_in_bytes: entry.number("SizeInBytes").unwrap_or(0),
        })
    }

    pub async fn get_subscription(
        &self,
        topic: &str,
        name: &str,
    ) -> ServiceBusResult<SubscriptionInfo> {
        let xml = self.get(&format!("{topic}/Subscriptions/{name}"), "").await?;
        let entries = FeedEntry::split(&xml);
        let entry = entries.first().ok_or_else(|| {
            crate::error::ServiceBusError::ResourceNotFound(format!(
                "subscription '{name}' of topic '{topic}'"
            ))
        })?;
        let mut subscription = subscription_from_entry(topic, entry);
        if subscription.name.is_empty() {
            subscription.name = name.to_string();
        }
        Ok(subscription)
    }

    /// Whether the entity's sessions flag is set; monitors decline such
    /// entities up front.
    pub async fn requires_session(&self, entity: &EntityRef) -> ServiceBusResult<bool> {
        match entity {
            EntityRef::Queue { name } => Ok(self.get_queue(name).await?.requires_session),
            EntityRef::Subscription { topic, name } => {
                Ok(self.get_subscription(topic, name).await?.requires_session)
            }
        }
    }

    /// Runtime counters for one entity, used before purges and transfers and
    /// for listing badges.
    pub async fn entity_counts(&self, entity: &EntityRef) -> ServiceBusResult<CountDetails> {
        let path = match entity {
            EntityRef::Queue { name } => name.clone(),
            EntityRef::Subscription { topic, name } => format!("{topic}/Subscriptions/{name}"),
        };
        let xml = self.get(&path, "").await?;
        let entries = FeedEntry::split(&xml);
        Ok(entries
            .first()
            .map(|e| e.count_details())
            .unwrap_or_default())
    }

    pub async fn create_subscription(&self, topic: &str, name: &str) -> ServiceBusResult<()> {
        let path = format!("{topic}/Subscriptions/{name}");
        let body = atom::subscription_entry_xml(&SubscriptionSettings::default());
        self.put(&path, body, false).await?;
        log::info!("created subscription '{name}' on topic '{topic}'");
        Ok(())
    }

    /// Replaces a subscription's description with the given settings.
    pub async fn update_subscription(
        &self,
        topic: &str,
        name: &str,
        settings: &SubscriptionSettings,
    ) -> ServiceBusResult<()> {
        let path = format!("{topic}/Subscriptions/{name}");
        self.put(&path, atom::subscription_entry_xml(settings), true)
            .await?;
        log::info!("updated subscription '{name}' on topic '{topic}'");
        Ok(())
    }

    pub async fn delete_subscription(&self, topic: &str, name: &str) -> ServiceBusResult<()> {
        self.delete(&format!("{topic}/Subscriptions/{name}")).await?;
        log::info!("deleted subscription '{name}' on topic '{topic}'");
        Ok(())
    }

    pub async fn list_rules(&self, topic: &str, name: &str) -> ServiceBusResult<Vec<RuleInfo>> {
        let xml = self
            .get(&format!("{topic}/Subscriptions/{name}/Rules"), "")
            .await?;
        Ok(FeedEntry::split(&xml)
            .iter()
            .map(rule_from_entry)
            .collect())
    }

    pub async fn create_sql_rule(
        &self,
        topic: &str,
        name: &str,
        rule_name: &str,
        expression: &str,
    ) -> ServiceBusResult<()> {
        let path = format!("{topic}/Subscriptions/{name}/Rules/{rule_name}");
        self.put(&path, atom::sql_rule_entry_xml(expression), false)
            .await?;
        Ok(())
    }

    pub async fn delete_rule(
        &self,
        topic: &str,
        name: &str,
        rule_name: &str,
    ) -> ServiceBusResult<()> {
        self.delete(&format!("{topic}/Subscriptions/{name}/Rules/{rule_name}"))
            .await
    }
}

fn queue_from_entry(entry: &FeedEntry<'_>) -> QueueInfo {
    QueueInfo {
        name: entry.title(),
        counts: entry.count_details(),
        requires_session: entry.flag("RequiresSession").unwrap_or(false),
        max_delivery_count: entry.number("MaxDeliveryCount"),
        status: entry.text("Status"),
        partitioned: entry.flag("EnablePartitioning").unwrap_or(false),
        size_in_bytes: entry.number("SizeInBytes").unwrap_or(0),
    }
}

fn subscription_from_entry(topic: &str, entry: &FeedEntry<'_>) -> SubscriptionInfo {
    SubscriptionInfo {
        topic: topic.to_string(),
        name: entry.title(),
        counts: entry.count_details(),
        requires_session: entry.flag("RequiresSession").unwrap_or(false),
        max_delivery_count: entry.number("MaxDeliveryCount"),
        status: entry.text("Status"),
    }
}

fn rule_from_entry(entry: &FeedEntry<'_>) -> RuleInfo {
    let filter_block = entry.child("Filter").unwrap_or_default();
    let filter = if let Some(correlation) = atom_text(&filter_block, "CorrelationId") {
        RuleFilter::Correlation(correlation)
    } else {
        match atom_text(&filter_block, "SqlExpression") {
            Some(sql) if sql == "1=1" => RuleFilter::True,
            Some(sql) => RuleFilter::Sql(sql),
            None => RuleFilter::True,
        }
    };
    let action_sql = entry
        .child("Action")
        .and_then(|block| atom_text(&block, "SqlExpression"));
    RuleInfo {
        name: entry.title(),
        filter,
        action_sql,
    }
}

fn atom_text(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)?;
    let value = block[start..start + end].trim();
    (!value.is_empty()).then(|| atom::unescape_xml(value))
}

//! ATOM feed parsing and request-body construction for the management API.
//!
//! Azure's WCF serializer emits namespace prefixes that vary with nesting
//! depth, so values are extracted by local element name from the raw XML
//! instead of through a strict schema.

/// One `<entry>` slice of an ATOM feed.
pub(crate) struct FeedEntry<'a> {
    xml: &'a str,
}

impl<'a> FeedEntry<'a> {
    /// Splits a feed (or a single-entry document) into its entries.
    pub(crate) fn split(xml: &'a str) -> Vec<FeedEntry<'a>> {
        let mut entries = Vec::new();
        let mut rest = xml;
        while let Some(start) = rest.find("<entry") {
            let Some(end) = rest[start..].find("</entry>") else {
                break;
            };
            let entry_end = start + end + "</entry>".len();
            entries.push(FeedEntry {
                xml: &rest[start..entry_end],
            });
            rest = &rest[entry_end..];
        }
        entries
    }

    /// Entity name from `<title type="text">name</title>`.
    pub(crate) fn title(&self) -> String {
        element_body(self.xml, "title")
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    pub(crate) fn text(&self, local_name: &str) -> Option<String> {
        text_any_prefix(self.xml, local_name)
    }

    pub(crate) fn flag(&self, local_name: &str) -> Option<bool> {
        self.text(local_name).and_then(|v| v.parse().ok())
    }

    pub(crate) fn number(&self, local_name: &str) -> Option<i64> {
        self.text(local_name).and_then(|v| v.parse().ok())
    }

    /// Message counters from the `CountDetails` block.
    pub(crate) fn count_details(&self) -> CountDetails {
        let block = element_body(self.xml, "CountDetails").unwrap_or_default();
        let read = |name: &str| {
            text_any_prefix(&block, name)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        CountDetails {
            active: read("ActiveMessageCount"),
            dead_letter: read("DeadLetterMessageCount"),
            scheduled: read("ScheduledMessageCount"),
            transfer: read("TransferMessageCount"),
            transfer_dead_letter: read("TransferDeadLetterMessageCount"),
        }
    }

    /// Inner XML of a named element, if present.
    pub(crate) fn child(&self, local_name: &str) -> Option<String> {
        element_body(self.xml, local_name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountDetails {
    pub active: i64,
    pub dead_letter: i64,
    pub scheduled: i64,
    pub transfer: i64,
    pub transfer_dead_letter: i64,
}

/// Inner XML of the first `<tag ...>...</tag>` element, attributes allowed on
/// the opening tag.
fn element_body(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let start = xml.find(&open)?;
    let after_open = start + xml[start..].find('>')? + 1;
    let end = xml[after_open..].find(&close)?;
    Some(xml[after_open..after_open + end].to_string())
}

/// Text of `<Tag>value</Tag>` with an exact, attribute-free opening tag.
/// Entities are unescaped, so a SQL filter reads back as it was written.
fn plain_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    let value = xml[start..start + end].trim();
    if value.is_empty() {
        None
    } else {
        Some(unescape_xml(value))
    }
}

/// Text of an element matched by local name under any namespace prefix.
fn text_any_prefix(xml: &str, local_name: &str) -> Option<String> {
    if let Some(v) = plain_text(xml, local_name) {
        return Some(v);
    }
    let close_suffix = format!(":{local_name}>");
    let suffix_pos = xml.find(&close_suffix)?;
    let lt_pos = xml[..suffix_pos].rfind('<')?;
    let prefixed_tag = &xml[lt_pos + 1..suffix_pos + close_suffix.len() - 1];
    plain_text(xml, prefixed_tag)
}

pub(crate) fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Reverse of [`escape_xml`] plus the quote entities the serializer may emit.
/// `&amp;` must be replaced last.
pub(crate) fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

const DESCRIPTION_NS: &str =
    r#"xmlns="http://schemas.microsoft.com/netservices/2010/10/servicebus/connect" xmlns:i="http://www.w3.org/2001/XMLSchema-instance""#;

fn wrap_entry(inner_xml: &str) -> String {
    format!(
        r#"<entry xmlns="http://www.w3.org/2005/Atom"><content type="application/xml">{inner_xml}</content></entry>"#
    )
}

/// PUT body for a subscription. Unset fields are omitted; on create the
/// broker fills in its defaults, on update the PUT replaces the whole
/// description with exactly what is sent.
pub(crate) fn subscription_entry_xml(settings: &crate::admin::SubscriptionSettings) -> String {
    let mut inner = format!("<SubscriptionDescription {DESCRIPTION_NS}>");
    if let Some(v) = &settings.lock_duration {
        inner.push_str(&format!("<LockDuration>{}</LockDuration>", escape_xml(v)));
    }
    if let Some(v) = settings.requires_session {
        inner.push_str(&format!("<RequiresSession>{v}</RequiresSession>"));
    }
    if let Some(v) = &settings.default_message_time_to_live {
        inner.push_str(&format!(
            "<DefaultMessageTimeToLive>{}</DefaultMessageTimeToLive>",
            escape_xml(v)
        ));
    }
    if let Some(v) = settings.dead_letter_on_expiration {
        inner.push_str(&format!(
            "<DeadLetteringOnMessageExpiration>{v}</DeadLetteringOnMessageExpiration>"
        ));
    }
    if let Some(v) = settings.max_delivery_count {
        inner.push_str(&format!("<MaxDeliveryCount>{v}</MaxDeliveryCount>"));
    }
    if let Some(v) = &settings.status {
        inner.push_str(&format!("<Status>{}</Status>", escape_xml(v)));
    }
    if let Some(v) = &settings.forward_to {
        inner.push_str(&format!("<ForwardTo>{}</ForwardTo>", escape_xml(v)));
    }
    inner.push_str("</SubscriptionDescription>");
    wrap_entry(&inner)
}

/// PUT body creating a SQL-filter rule.
pub(crate) fn sql_rule_entry_xml(expression: &str) -> String {
    let expression = escape_xml(expression);
    wrap_entry(&format!(
        r#"<RuleDescription {DESCRIPTION_NS}><Filter i:type="SqlFilter"><SqlExpression>{expression}</SqlExpression></Filter></RuleDescription>"#
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEUE_FEED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title type="text">orders</title>
    <content type="application/xml">
      <QueueDescription xmlns="http://schemas.microsoft.com/netservices/2010/10/servicebus/connect">
        <MaxDeliveryCount>10</MaxDeliveryCount>
        <RequiresSession>false</RequiresSession>
        <Status>Active</Status>
        <EnablePartitioning>true</EnablePartitioning>
        <CountDetails xmlns:d2p1="http://schemas.microsoft.com/netservices/2011/06/servicebus">
          <d2p1:ActiveMessageCount>42</d2p1:ActiveMessageCount>
          <d2p1:DeadLetterMessageCount>7</d2p1:DeadLetterMessageCount>
          <d2p1:ScheduledMessageCount>0</d2p1:ScheduledMessageCount>
          <d2p1:TransferMessageCount>0</d2p1:TransferMessageCount>
          <d2p1:TransferDeadLetterMessageCount>1</d2p1:TransferDeadLetterMessageCount>
        </CountDetails>
      </QueueDescription>
    </content>
  </entry>
  <entry>
    <title type="text">billing</title>
    <content type="application/xml">
      <QueueDescription xmlns="http://schemas.microsoft.com/netservices/2010/10/servicebus/connect">
        <RequiresSession>true</RequiresSession>
      </QueueDescription>
    </content>
  </entry>
</feed>"#;

    #[test]
    fn splits_feed_into_entries_with_titles() {
        let entries = FeedEntry::split(QUEUE_FEED);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title(), "orders");
        assert_eq!(entries[1].title(), "billing");
    }

    #[test]
    fn reads_flags_and_numbers() {
        let entries = FeedEntry::split(QUEUE_FEED);
        assert_eq!(entries[0].flag("RequiresSession"), Some(false));
        assert_eq!(entries[0].number("MaxDeliveryCount"), Some(10));
        assert_eq!(entries[0].text("Status").as_deref(), Some("Active"));
        assert_eq!(entries[1].flag("RequiresSession"), Some(true));
        assert_eq!(entries[1].number("MaxDeliveryCount"), None);
    }

    #[test]
    fn count_details_survive_wcf_namespace_prefixes() {
        let entries = FeedEntry::split(QUEUE_FEED);
        let counts = entries[0].count_details();
        assert_eq!(counts.active, 42);
        assert_eq!(counts.dead_letter, 7);
        assert_eq!(counts.transfer_dead_letter, 1);

        // An entry without the block reports zeroes.
        assert_eq!(entries[1].count_details(), CountDetails::default());
    }

    #[test]
    fn empty_feed_yields_no_entries() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>Queues</title></feed>"#;
        assert!(FeedEntry::split(xml).is_empty());
    }

    #[test]
    fn rule_body_escapes_sql_expression() {
        let body = sql_rule_entry_xml("priority > 3 & region = 'eu'");
        assert!(body.contains("<SqlExpression>priority &gt; 3 &amp; region = 'eu'</SqlExpression>"));
        assert!(body.contains(r#"<Filter i:type="SqlFilter">"#));
    }

    #[test]
    fn rule_feed_filters_parse() {
        let feed = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title type="text">$Default</title>
    <content><RuleDescription><Filter i:type="TrueFilter"><SqlExpression>1=1</SqlExpression></Filter></RuleDescription></content>
  </entry>
  <entry>
    <title type="text">high-priority</title>
    <content><RuleDescription><Filter i:type="SqlFilter"><SqlExpression>priority &gt; 3</SqlExpression></Filter></RuleDescription></content>
  </entry>
</feed>"#;
        let entries = FeedEntry::split(feed);
        assert_eq!(entries[0].title(), "$Default");
        assert_eq!(entries[0].text("SqlExpression").as_deref(), Some("1=1"));
        assert_eq!(
            entries[1].text("SqlExpression").as_deref(),
            Some("priority > 3")
        );
    }

    #[test]
    fn escaped_sql_round_trips_through_write_and_read() {
        let expression = "region = 'eu' & priority > 3";
        let body = sql_rule_entry_xml(expression);
        let entries = FeedEntry::split(&body);
        assert_eq!(
            entries[0].text("SqlExpression").as_deref(),
            Some(expression)
        );
    }

    #[test]
    fn subscription_body_includes_only_set_fields() {
        let settings = crate::admin::SubscriptionSettings {
            max_delivery_count: Some(20),
            status: Some("Disabled".to_string()),
            ..Default::default()
        };
        let body = subscription_entry_xml(&settings);
        assert!(body.contains("<MaxDeliveryCount>20</MaxDeliveryCount>"));
        assert!(body.contains("<Status>Disabled</Status>"));
        assert!(!body.contains("LockDuration"));
        assert!(!body.contains("RequiresSession"));
    }
}

//! Resolves a publish to its set of destination queues
//!
//! Dispatch is a match over the closed [`ExchangeKind`] set. Duplicate
//! destinations reached through several bindings collapse to one delivery
//! per queue per publish.

mod topic;

use indexmap::IndexMap;

use crate::entities::{Binding, Exchange, ExchangeKind, Queue};

pub(crate) use topic::TopicCache;

/// Returns the destination queue names for a publish, deduplicated and in
/// first-match order
pub(crate) fn route(
    exchange: &Exchange,
    bindings: &[Binding],
    queues: &IndexMap<String, Queue>,
    routing_key: &str,
    topics: &mut TopicCache,
) -> Vec<String> {
    // the default exchange routes straight to the queue named by the key
    if exchange.name.is_empty() {
        return match queues.contains_key(routing_key) {
            true => vec![routing_key.to_string()],
            false => Vec::new(),
        };
    }

    let mut destinations = Vec::new();
    let mut push = |queue: &str| {
        if queues.contains_key(queue) && !destinations.iter().any(|d| d == queue) {
            destinations.push(queue.to_string());
        }
    };

    for binding in bindings.iter().filter(|b| b.source == exchange.name) {
        let matched = match exchange.kind {
            ExchangeKind::Direct => binding.routing_key == routing_key,
            ExchangeKind::Fanout => true,
            ExchangeKind::Topic => topics.matches(&binding.routing_key, routing_key),
            // declaration is accepted but matching never succeeds
            ExchangeKind::Headers => false,
        };
        if matched {
            push(&binding.destination);
        }
    }

    destinations
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrumq_codec::FieldTable;

    fn exchange(name: &str, kind: ExchangeKind) -> Exchange {
        Exchange {
            name: name.into(),
            kind,
            durable: false,
            auto_delete: false,
            internal: false,
            arguments: FieldTable::new(),
            is_default: false,
        }
    }

    fn queue(name: &str) -> Queue {
        Queue {
            name: name.into(),
            durable: false,
            exclusive: false,
            auto_delete: false,
            arguments: FieldTable::new(),
            exclusive_owner: None,
            messages: Default::default(),
            consumer_tags: Vec::new(),
            next_consumer: 0,
            had_consumers: false,
        }
    }

    fn binding(source: &str, destination: &str, routing_key: &str) -> Binding {
        Binding {
            source: source.into(),
            destination: destination.into(),
            routing_key: routing_key.into(),
            arguments: FieldTable::new(),
        }
    }

    fn queues(names: &[&str]) -> IndexMap<String, Queue> {
        names.iter().map(|n| (n.to_string(), queue(n))).collect()
    }

    #[test]
    fn default_exchange_routes_by_queue_name() {
        let ex = exchange("", ExchangeKind::Direct);
        let qs = queues(&["jobs"]);
        let mut topics = TopicCache::default();
        assert_eq!(route(&ex, &[], &qs, "jobs", &mut topics), vec!["jobs"]);
        assert!(route(&ex, &[], &qs, "missing", &mut topics).is_empty());
    }

    #[test]
    fn direct_exchange_requires_key_equality() {
        let ex = exchange("orders", ExchangeKind::Direct);
        let qs = queues(&["new", "any"]);
        let bindings = vec![
            binding("orders", "new", "order.new"),
            binding("orders", "any", "order.cancelled"),
        ];
        let mut topics = TopicCache::default();
        assert_eq!(
            route(&ex, &bindings, &qs, "order.new", &mut topics),
            vec!["new"]
        );
    }

    #[test]
    fn fanout_reaches_every_bound_queue_once() {
        let ex = exchange("logs", ExchangeKind::Fanout);
        let qs = queues(&["a", "b"]);
        let bindings = vec![
            binding("logs", "a", ""),
            binding("logs", "b", ""),
            // second binding to the same queue must not double-deliver
            binding("logs", "a", "extra"),
        ];
        let mut topics = TopicCache::default();
        assert_eq!(route(&ex, &bindings, &qs, "ignored", &mut topics), vec!["a", "b"]);
    }

    #[test]
    fn topic_exchange_delegates_to_the_matcher() {
        let ex = exchange("t", ExchangeKind::Topic);
        let qs = queues(&["all", "stock"]);
        let bindings = vec![
            binding("t", "all", "#"),
            binding("t", "stock", "stock.*"),
        ];
        let mut topics = TopicCache::default();
        assert_eq!(
            route(&ex, &bindings, &qs, "stock.nasdaq", &mut topics),
            vec!["all", "stock"]
        );
        assert_eq!(
            route(&ex, &bindings, &qs, "weather.usa", &mut topics),
            vec!["all"]
        );
    }

    #[test]
    fn headers_exchange_never_matches() {
        let ex = exchange("h", ExchangeKind::Headers);
        let qs = queues(&["q"]);
        let bindings = vec![binding("h", "q", "")];
        let mut topics = TopicCache::default();
        assert!(route(&ex, &bindings, &qs, "", &mut topics).is_empty());
    }

    #[test]
    fn vanished_queues_are_skipped() {
        let ex = exchange("logs", ExchangeKind::Fanout);
        let qs = queues(&["alive"]);
        let bindings = vec![binding("logs", "alive", ""), binding("logs", "gone", "")];
        let mut topics = TopicCache::default();
        assert_eq!(route(&ex, &bindings, &qs, "", &mut topics), vec!["alive"]);
    }
}

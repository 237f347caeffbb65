//! A user's interactive session against a broker.
//!
//! The session keeps the user's topic -> callback map so each subscription
//! can be cancelled later, renders delivered messages as `[topic] message`
//! lines on the session output, and stores the subscribed topic list in the
//! `SubscriptionBook` after every change so the next login can restore it.

use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{info, warn};

use crate::broker::{Broker, Callback};
use crate::persistence::SubscriptionBook;
use crate::utils::{Error, Result};

pub struct Session {
    broker: Arc<dyn Broker>,
    book: SubscriptionBook,
    username: String,
    output: Sender<String>,
    subscribed: Vec<(String, Callback)>,
}

impl Session {
    /// Start a session for `username`, restoring saved subscriptions to
    /// topics the broker still knows about.
    pub fn login(
        broker: Arc<dyn Broker>,
        book: SubscriptionBook,
        username: &str,
        output: Sender<String>,
    ) -> Result<Self> {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::InvalidInput("a username is required".to_string()));
        }

        let mut session = Self {
            broker,
            book,
            username: username.to_string(),
            output,
            subscribed: Vec::new(),
        };
        session.restore()?;
        Ok(session)
    }

    fn restore(&mut self) -> Result<()> {
        let known = self.broker.get_topics();
        for topic in self.book.load(&self.username)? {
            if !known.contains(&topic) {
                warn!(user = %self.username, %topic, "skipping saved subscription to unknown topic");
                continue;
            }
            info!(user = %self.username, %topic, "restoring subscription");
            let callback = self.render_to_output(&topic);
            self.broker.subscribe(&topic, callback.clone(), None)?;
            self.subscribed.push((topic, callback));
        }
        Ok(())
    }

    fn render_to_output(&self, topic: &str) -> Callback {
        let output = self.output.clone();
        let topic = topic.to_string();
        Callback::from_fn(move |message| {
            let _ = output.send(format!("[{topic}] {message}"));
        })
    }

    fn save(&self) -> Result<()> {
        self.book.save(&self.username, &self.subscribed_topics())
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscribed.iter().map(|(topic, _)| topic.clone()).collect()
    }

    /// Publish `content` signed with the username.
    pub fn publish(&self, topic: &str, content: &str) -> Result<()> {
        let (topic, content) = (topic.trim(), content.trim());
        if topic.is_empty() || content.is_empty() {
            return Err(Error::InvalidInput(
                "both a topic and a message are required".to_string(),
            ));
        }
        self.broker
            .publish(topic, &format!("{}: {content}", self.username))
    }

    /// Subscribe to `topic`; an empty filter means no filter. An existing
    /// subscription to the same topic is replaced.
    pub fn subscribe(&mut self, topic: &str, filter: Option<&str>) -> Result<()> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(Error::InvalidInput("a topic is required".to_string()));
        }
        let filter = filter.map(str::trim).filter(|f| !f.is_empty());

        self.drop_subscription(topic)?;
        let callback = self.render_to_output(topic);
        info!(user = %self.username, topic, ?filter, "subscribing");
        self.broker.subscribe(topic, callback.clone(), filter)?;
        self.subscribed.push((topic.to_string(), callback));
        self.save()
    }

    /// Returns whether the user was subscribed to `topic`.
    pub fn unsubscribe(&mut self, topic: &str) -> Result<bool> {
        let removed = self.drop_subscription(topic.trim())?;
        if removed {
            let _ = self
                .output
                .send(format!("[INFO] unsubscribed from '{}'", topic.trim()));
            self.save()?;
        }
        Ok(removed)
    }

    fn drop_subscription(&mut self, topic: &str) -> Result<bool> {
        let Some(position) = self.subscribed.iter().position(|(t, _)| t == topic) else {
            return Ok(false);
        };
        let (topic, callback) = self.subscribed.remove(position);
        self.broker.unsubscribe(&topic, &callback)?;
        Ok(true)
    }

    pub fn topics(&self) -> Vec<String> {
        self.broker.get_topics()
    }

    pub fn search(&self, keyword: &str) -> Result<Vec<String>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(Error::InvalidInput("a keyword is required".to_string()));
        }
        self.broker.search_topics_by_keyword(keyword)
    }

    /// Save the subscription list, then cancel every live subscription.
    pub fn logout(mut self) -> Result<()> {
        self.save()?;
        for (topic, callback) in std::mem::take(&mut self.subscribed) {
            self.broker.unsubscribe(&topic, &callback)?;
        }
        info!(user = %self.username, "logged out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crossbeam_channel::{Receiver, unbounded};
    use tempfile::{TempDir, tempdir};

    use super::Session;
    use crate::broker::{Broker, LocalBroker};
    use crate::persistence::{FileLogStore, LogStore, SubscriptionBook};
    use crate::utils::Error;

    struct Fixture {
        _dir: TempDir,
        broker: Arc<dyn Broker>,
        book: SubscriptionBook,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let store: Arc<dyn LogStore> = Arc::new(FileLogStore::new(dir.path()));
        let broker: Arc<dyn Broker> = Arc::new(LocalBroker::new(store.clone()).unwrap());
        Fixture {
            _dir: dir,
            broker,
            book: SubscriptionBook::new(store),
        }
    }

    fn login(fx: &Fixture, user: &str) -> (Session, Receiver<String>) {
        let (tx, rx) = unbounded();
        let session = Session::login(fx.broker.clone(), fx.book.clone(), user, tx).unwrap();
        (session, rx)
    }

    #[test]
    fn test_publish_signs_messages() {
        let fx = fixture();
        let (alice, _) = login(&fx, "alice");
        alice.publish(" sports ", " go team ").unwrap();
        assert_eq!(alice.topics(), vec!["sports"]);

        let (mut bob, rx) = login(&fx, "bob");
        bob.subscribe("sports", None).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "[sports] alice: go team");
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let fx = fixture();
        let (tx, _) = unbounded();
        assert!(matches!(
            Session::login(fx.broker.clone(), fx.book.clone(), "  ", tx),
            Err(Error::InvalidInput(_))
        ));

        let (mut alice, _) = login(&fx, "alice");
        assert!(matches!(alice.publish("", "x"), Err(Error::InvalidInput(_))));
        assert!(matches!(alice.publish("news", " "), Err(Error::InvalidInput(_))));
        assert!(matches!(alice.subscribe(" ", None), Err(Error::InvalidInput(_))));
        assert!(matches!(alice.search(""), Err(Error::InvalidInput(_))));
        assert!(fx.broker.get_topics().is_empty());
    }

    #[test]
    fn test_filter_and_resubscribe_replaces() {
        let fx = fixture();
        let (mut bob, rx) = login(&fx, "bob");
        fx.broker.publish("news", "weather: sun").unwrap();
        fx.broker.publish("news", "election: results").unwrap();

        bob.subscribe("news", Some("election")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "[news] election: results");
        assert!(rx.try_recv().is_err());

        bob.subscribe("news", Some("")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "[news] weather: sun");
        assert_eq!(rx.try_recv().unwrap(), "[news] election: results");

        fx.broker.publish("news", "carl: hi").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "[news] carl: hi");
        assert!(rx.try_recv().is_err());
        assert_eq!(bob.subscribed_topics(), vec!["news"]);
    }

    #[test]
    fn test_unsubscribe_reports_and_saves() {
        let fx = fixture();
        fx.broker.publish("news", "x").unwrap();
        let (mut bob, rx) = login(&fx, "bob");
        bob.subscribe("news", None).unwrap();
        assert_eq!(fx.book.load("bob").unwrap(), vec!["news"]);
        let _ = rx.try_recv();

        assert!(bob.unsubscribe("news").unwrap());
        assert_eq!(rx.try_recv().unwrap(), "[INFO] unsubscribed from 'news'");
        assert!(!bob.unsubscribe("news").unwrap());
        assert!(fx.book.load("bob").unwrap().is_empty());

        fx.broker.publish("news", "y").unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_logout_then_login_restores_known_topics() {
        let fx = fixture();
        fx.broker.publish("news", "first").unwrap();
        fx.book
            .save("carol", &["news".to_string(), "gone".to_string()])
            .unwrap();

        let (carol, rx) = login(&fx, "carol");
        assert_eq!(carol.subscribed_topics(), vec!["news"]);
        assert_eq!(rx.try_recv().unwrap(), "[news] first");

        carol.logout().unwrap();
        fx.broker.publish("news", "while away").unwrap();
        assert!(rx.try_recv().is_err());

        let (carol, rx) = login(&fx, "carol");
        assert_eq!(carol.username(), "carol");
        assert_eq!(rx.try_recv().unwrap(), "[news] first");
        assert_eq!(rx.try_recv().unwrap(), "[news] while away");
    }
}

use std::collections::{BTreeSet, HashMap};

use tlj_frame::ConnectionId;

/// Two-way index between connections and tag names.
///
/// Both directions are updated together, so a connection appears under a
/// tag exactly when the tag appears under the connection.
#[derive(Debug, Default)]
pub(crate) struct TagIndex {
    by_connection: HashMap<ConnectionId, BTreeSet<String>>,
    by_tag: HashMap<String, BTreeSet<ConnectionId>>,
}

impl TagIndex {
    /// Returns `false` if the connection already carried the tag.
    pub(crate) fn tag(&mut self, conn: ConnectionId, tag: &str) -> bool {
        let added = self
            .by_connection
            .entry(conn)
            .or_default()
            .insert(tag.to_string());
        self.by_tag.entry(tag.to_string()).or_default().insert(conn);
        added
    }

    /// Returns `false` if the connection did not carry the tag.
    pub(crate) fn untag(&mut self, conn: ConnectionId, tag: &str) -> bool {
        let removed = match self.by_connection.get_mut(&conn) {
            Some(tags) => {
                let removed = tags.remove(tag);
                if tags.is_empty() {
                    self.by_connection.remove(&conn);
                }
                removed
            }
            None => false,
        };
        if let Some(conns) = self.by_tag.get_mut(tag) {
            conns.remove(&conn);
            if conns.is_empty() {
                self.by_tag.remove(tag);
            }
        }
        removed
    }

    /// Drop every tag of `conn`; returns the tags it carried.
    pub(crate) fn remove(&mut self, conn: ConnectionId) -> Vec<String> {
        let Some(tags) = self.by_connection.remove(&conn) else {
            return Vec::new();
        };
        for tag in &tags {
            if let Some(conns) = self.by_tag.get_mut(tag) {
                conns.remove(&conn);
                if conns.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
        tags.into_iter().collect()
    }

    pub(crate) fn tags_of(&self, conn: ConnectionId) -> Vec<String> {
        self.by_connection
            .get(&conn)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn connections_of(&self, tag: &str) -> Vec<ConnectionId> {
        self.by_tag
            .get(tag)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.by_connection.is_empty() && self.by_tag.is_empty()
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let forward = self
            .by_connection
            .iter()
            .all(|(conn, tags)| tags.iter().all(|t| self.by_tag.get(t).is_some_and(|c| c.contains(conn))));
        let backward = self
            .by_tag
            .iter()
            .all(|(tag, conns)| conns.iter().all(|c| self.by_connection.get(c).is_some_and(|t| t.contains(tag))));
        forward && backward
    }
}

use crate::connection::{Connection, ConnectionId};
use crate::rpc::{ColumnInfo, RefreshConnectionData, TableInfo, TablesAndColumns};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionNode {
    pub connection: Connection,
    pub tables: Vec<TableInfo>,
    pub columns: Vec<ColumnInfo>,
}

impl ConnectionNode {
    fn new(connection: Connection) -> Self {
        Self {
            connection,
            tables: Vec::new(),
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected
    }
}

/// What the explorer tree view shows: one node per configured connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExplorerTree {
    nodes: Vec<ConnectionNode>,
}

impl ExplorerTree {
    #[must_use]
    pub fn nodes(&self) -> &[ConnectionNode] {
        &self.nodes
    }

    #[must_use]
    pub fn node(&self, id: &ConnectionId) -> Option<&ConnectionNode> {
        self.nodes.iter().find(|node| &node.connection.id == id)
    }

    /// Rebuilds the node list from configuration. Cached tables and connected
    /// flags survive for ids that are still configured.
    pub fn replace_connections(&mut self, connections: &[Connection]) {
        let previous = std::mem::take(&mut self.nodes);
        self.nodes = connections
            .iter()
            .map(|connection| {
                match previous.iter().find(|node| node.connection.id == connection.id) {
                    Some(existing) => {
                        let mut connection = connection.clone();
                        connection.is_connected = existing.connection.is_connected;
                        ConnectionNode {
                            connection,
                            tables: existing.tables.clone(),
                            columns: existing.columns.clone(),
                        }
                    }
                    None => ConnectionNode::new(connection.clone()),
                }
            })
            .collect();
    }

    pub fn mark_connected(&mut self, connection: &Connection) {
        self.node_entry(connection).connection = connection.clone();
    }

    pub fn mark_disconnected(&mut self, id: &ConnectionId) {
        if let Some(node) = self.nodes.iter_mut().find(|node| &node.connection.id == id) {
            node.connection.is_connected = false;
            node.tables.clear();
            node.columns.clear();
        }
    }

    /// Takes connected flags from a backend listing; unknown ids are ignored.
    pub fn sync_connected(&mut self, listed: &[Connection]) {
        for node in &mut self.nodes {
            node.connection.is_connected = listed
                .iter()
                .any(|other| other.id == node.connection.id && other.is_connected);
        }
    }

    pub fn set_schema(&mut self, id: &ConnectionId, schema: TablesAndColumns) {
        if let Some(node) = self.nodes.iter_mut().find(|node| &node.connection.id == id) {
            node.tables = schema.tables;
            node.columns = schema.columns;
        }
    }

    pub fn apply(&mut self, data: RefreshConnectionData) {
        let node = self.node_entry(&data.conn);
        node.connection = data.conn;
        if node.connection.is_connected {
            node.tables = data.tables;
            node.columns = data.columns;
        } else {
            node.tables.clear();
            node.columns.clear();
        }
    }

    #[must_use]
    pub fn connected(&self) -> Vec<&Connection> {
        self.nodes
            .iter()
            .filter(|node| node.is_connected())
            .map(|node| &node.connection)
            .collect()
    }

    #[must_use]
    pub fn table_names(&self, id: &ConnectionId) -> Vec<String> {
        self.node(id)
            .map(|node| node.tables.iter().map(|table| table.name.clone()).collect())
            .unwrap_or_default()
    }

    fn node_entry(&mut self, connection: &Connection) -> &mut ConnectionNode {
        let index = match self
            .nodes
            .iter()
            .position(|node| node.connection.id == connection.id)
        {
            Some(index) => index,
            None => {
                self.nodes.push(ConnectionNode::new(connection.clone()));
                self.nodes.len() - 1
            }
        };
        &mut self.nodes[index]
    }
}

#[cfg(test)]
mod tests {
    use super::ExplorerTree;
    use crate::connection::{Connection, ConnectionConfig};
    use crate::rpc::{ColumnInfo, RefreshConnectionData, TableInfo, TablesAndColumns};

    fn connection(name: &str) -> Connection {
        Connection::from(ConnectionConfig::new(name, "sqlite", "file"))
    }

    fn table(name: &str) -> TableInfo {
        TableInfo {
            name: name.to_string(),
            is_view: false,
            num_of_columns: Some(1),
        }
    }

    fn column(table_name: &str, column_name: &str) -> ColumnInfo {
        ColumnInfo {
            table_name: table_name.to_string(),
            column_name: column_name.to_string(),
            data_type: "text".to_string(),
            size: None,
        }
    }

    #[test]
    fn refresh_push_fills_tables_and_columns() {
        let mut tree = ExplorerTree::default();
        tree.replace_connections(&[connection("a")]);

        let mut conn = connection("a");
        conn.is_connected = true;
        tree.apply(RefreshConnectionData {
            conn: conn.clone(),
            tables: vec![table("users"), table("orders")],
            columns: vec![column("users", "id"), column("orders", "total")],
        });

        assert_eq!(tree.table_names(&conn.id), vec!["users", "orders"]);
        let node = tree.node(&conn.id).expect("node for a");
        assert_eq!(node.columns.len(), 2);
        assert_eq!(node.columns[0].column_name, "id");
        assert_eq!(tree.connected().len(), 1);
    }

    #[test]
    fn disconnected_push_clears_schema() {
        let mut tree = ExplorerTree::default();
        let mut conn = connection("a");
        conn.is_connected = true;
        tree.mark_connected(&conn);
        tree.set_schema(
            &conn.id,
            TablesAndColumns {
                tables: vec![table("users")],
                columns: Vec::new(),
            },
        );

        conn.is_connected = false;
        tree.apply(RefreshConnectionData {
            conn: conn.clone(),
            tables: vec![table("users")],
            columns: Vec::new(),
        });
        assert!(tree.table_names(&conn.id).is_empty());
        assert!(tree.connected().is_empty());
    }

    #[test]
    fn replace_connections_keeps_state_for_surviving_ids() {
        let mut tree = ExplorerTree::default();
        let mut a = connection("a");
        a.is_connected = true;
        tree.mark_connected(&a);
        tree.set_schema(
            &a.id,
            TablesAndColumns {
                tables: vec![table("t")],
                columns: Vec::new(),
            },
        );

        tree.replace_connections(&[connection("a"), connection("b")]);
        assert_eq!(tree.nodes().len(), 2);
        assert!(tree.node(&a.id).is_some_and(super::ConnectionNode::is_connected));
        assert_eq!(tree.table_names(&a.id), vec!["t"]);

        tree.replace_connections(&[connection("b")]);
        assert!(tree.node(&a.id).is_none());
    }

    #[test]
    fn sync_connected_follows_backend_listing() {
        let mut tree = ExplorerTree::default();
        tree.replace_connections(&[connection("a"), connection("b")]);

        let mut listed_b = connection("b");
        listed_b.is_connected = true;
        tree.sync_connected(&[connection("a"), listed_b.clone()]);

        let connected: Vec<_> = tree.connected().into_iter().map(|c| c.name.clone()).collect();
        assert_eq!(connected, vec!["b"]);

        tree.mark_disconnected(&listed_b.id);
        assert!(tree.connected().is_empty());
    }
}

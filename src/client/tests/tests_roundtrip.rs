//! Client-against-server round trips on a single-node cluster.

#[cfg(test)]
mod tests {
    use crate::client::Client;
    use crate::cluster::ClusterConfig;
    use crate::server::{Server, ServerConfig};
    use tempfile::TempDir;

    /// Boots a single-node server and returns a client wired to it.
    fn boot(tmp: &TempDir) -> Client {
        let config = ServerConfig {
            addr: "127.0.0.1:0".into(),
            db_dir: tmp.path().join("db"),
            cluster: ClusterConfig::new(vec!["127.0.0.1:0".into()], false).unwrap(),
        };
        let server = Server::new(config).unwrap();
        let addr = server.local_addr().unwrap();
        std::thread::spawn(move || {
            let _ = server.serve();
        });

        Client::new(ClusterConfig::new(vec![addr.to_string()], false).unwrap())
    }

    #[test]
    fn probe_reports_reachable_servers() {
        let tmp = TempDir::new().unwrap();
        let mut client = boot(&tmp);

        let probes = client.probe();
        assert_eq!(probes.len(), 1);
        assert!(probes[0].1);
    }

    #[test]
    fn set_get_delete_round_trip() {
        let tmp = TempDir::new().unwrap();
        let mut client = boot(&tmp);

        assert!(client.set(b"t", b"k", b"value").is_empty());
        let (value, failed) = client.get(b"t", b"k");
        assert!(failed.is_empty());
        assert_eq!(value, Some(b"value".to_vec()));

        // Delete via empty value; the key then reads as an empty answer.
        assert!(client.set(b"t", b"k", b"").is_empty());
        let (value, _) = client.get(b"t", b"k");
        assert_eq!(value, Some(Vec::new()));
    }

    #[test]
    fn size_and_drop() {
        let tmp = TempDir::new().unwrap();
        let mut client = boot(&tmp);

        for i in 0..7u32 {
            client.set(b"t", &i.to_be_bytes(), b"v");
        }
        let (total, failed) = client.size(b"t");
        assert!(failed.is_empty());
        assert_eq!(total, Some(7));

        assert!(client.drop_table(b"t").is_empty());
        let (total, _) = client.size(b"t");
        assert_eq!(total, Some(0));
    }

    #[test]
    fn unreachable_server_is_reported_by_address() {
        // Nothing listens here.
        let dead = "127.0.0.1:1".to_string();
        let mut client = Client::new(ClusterConfig::new(vec![dead.clone()], false).unwrap());

        let failed = client.set(b"t", b"k", b"v");
        assert_eq!(failed, vec![dead.clone()]);

        let (value, failed) = client.get(b"t", b"k");
        assert_eq!(value, None);
        assert_eq!(failed, vec![dead]);
    }

    #[test]
    fn quit_closes_cleanly_and_requests_redial() {
        let tmp = TempDir::new().unwrap();
        let mut client = boot(&tmp);

        client.set(b"t", b"k", b"v");
        client.quit();

        // A fresh request lazily redials.
        let (value, failed) = client.get(b"t", b"k");
        assert!(failed.is_empty());
        assert_eq!(value, Some(b"v".to_vec()));
    }
}

//! End-to-end YAML config loading, as the `server`/`client` binaries do it
//! (spec §A, "Configuration").

use distlog::config::Config;

const YAML: &str = r#"
segment:
  max_store_bytes: 4096
  max_index_bytes: 4096
  initial_offset: 0
raft:
  node_name: "0"
  bootstrap: true
  bind_addr: "127.0.0.1"
  rpc_port: 8401
  serf_port: 8402
  data_dir: "/tmp/distlog-test-node-0"
certs:
  ca_file: ""
  server_cert_file: ""
  server_key_file: ""
  acl_model_file: ""
  acl_policy_file: ""
"#;

#[test]
fn loads_and_fills_in_replicated_defaults() {
    let config = Config::from_yaml_str(YAML).unwrap();
    assert_eq!(config.raft.node_name, "0");
    assert!(config.raft.bootstrap);
    // initial_offset 0 gets bumped to 1 for replicated mode (raft index 0
    // is reserved).
    assert_eq!(config.segment.initial_offset, 1);
}

#[test]
fn rejects_undersized_store_cap() {
    let bad = YAML.replace("max_store_bytes: 4096", "max_store_bytes: 2");
    assert!(Config::from_yaml_str(&bad).is_err());
}

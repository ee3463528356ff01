fn main() {
    println!("cargo:rerun-if-changed=proto/log.proto");
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/log.proto"], &["proto"])
        .expect("failed to compile proto/log.proto");
}

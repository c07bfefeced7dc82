use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc unless the caller already points at one
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path().map_err(|e| e.to_string())?;
        std::env::set_var("PROTOC", protoc);
    }

    let proto_root = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR")?).join("proto");
    let proto_file = proto_root.join("pubsub.proto");

    let mut includes = vec![proto_root.clone()];
    includes.push(protoc_bin_vendored::include_path().map_err(|e| e.to_string())?);

    tonic_build::configure().compile(&[&proto_file], &includes)?;

    println!("cargo:rerun-if-changed={}", proto_file.display());
    Ok(())
}

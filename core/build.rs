fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Central proto repo is at ../proto/ relative to core/
    let proto_root = "../proto";
    let capability_proto = format!("{proto_root}/silta/capability/v1/capability.proto");

    // Tell Cargo to rerun if the proto files change
    println!("cargo:rerun-if-changed={capability_proto}");

    // Skip proto compilation if source doesn't exist (CI uses pre-generated file)
    if !std::path::Path::new(&capability_proto).exists() {
        println!("cargo:warning=Proto source not found, using pre-generated file");
        return Ok(());
    }

    tonic_build::configure()
        .build_server(false)
        .build_client(false)
        .out_dir("src/proto")
        .compile_protos(&[&capability_proto], &[proto_root])?;

    Ok(())
}

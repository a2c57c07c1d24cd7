fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Central proto repo is at ../proto/ relative to broker/
    let proto_root = "../proto";
    let broker_proto = format!("{proto_root}/silta/v1/broker.proto");
    let capability_proto = format!("{proto_root}/silta/capability/v1/capability.proto");

    // Tell Cargo to rerun if the proto files change
    println!("cargo:rerun-if-changed={broker_proto}");
    println!("cargo:rerun-if-changed={capability_proto}");

    // Skip proto compilation if source doesn't exist (CI uses pre-generated file)
    if !std::path::Path::new(&broker_proto).exists() {
        println!("cargo:warning=Proto source not found, using pre-generated file");
        return Ok(());
    }

    // Configure extern paths so the shared capability messages resolve to the
    // silta-core types instead of generating duplicates. This ensures we have
    // ONE set of capability types across the codebase.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .out_dir("src/proto")
        .extern_path(".silta.capability.v1", "::silta_core::proto")
        .compile_protos(&[&broker_proto], &[proto_root])?;

    Ok(())
}

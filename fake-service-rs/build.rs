fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=../.proto/fake_service.proto");

    // Use the bundled protoc so the build does not depend on a system install
    unsafe {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());
    }
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["../.proto/fake_service.proto"], &["../.proto"])?;

    Ok(())
}

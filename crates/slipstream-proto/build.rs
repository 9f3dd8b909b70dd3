// Build script compiling the remote-write protocol definition into Rust
// structs and service traits.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Supply a protoc binary when none is present on the system PATH.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    tonic_build::compile_protos("proto/slicefile.proto")?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_prost_build::configure()
        .build_client(false)
        .build_server(true)
        .compile_protos(
            &[
                "../../proto/opentelemetry/proto/common/v1/common.proto",
                "../../proto/opentelemetry/proto/resource/v1/resource.proto",
                "../../proto/opentelemetry/proto/trace/v1/trace.proto",
                "../../proto/opentelemetry/proto/logs/v1/logs.proto",
                "../../proto/opentelemetry/proto/collector/trace/v1/trace_service.proto",
                "../../proto/opentelemetry/proto/collector/logs/v1/logs_service.proto",
            ],
            &["../../proto"],
        )?;
    Ok(())
}

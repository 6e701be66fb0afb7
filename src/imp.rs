// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Backend selection.

use crate::config::Config;
use crate::error::Error;
use crate::graphics::Graphics;
#[cfg(not(all(windows, feature = "backend_d3d12")))]
use crate::shader_ir::Bytecode;

#[cfg(feature = "backend_d3d12")]
pub(crate) mod d3d12;

#[cfg(all(windows, feature = "backend_d3d12"))]
pub(crate) use d3d12::compile_hlsl;

/// HLSL needs the native compiler.
#[cfg(not(all(windows, feature = "backend_d3d12")))]
pub(crate) fn compile_hlsl(_source: &str) -> Result<Bytecode, Error> {
    Err(Error::Unsupported(
        "compiling HLSL needs the native Direct3D compiler".to_string(),
    ))
}

/// The binding layer `config` runs on.
#[cfg(all(windows, feature = "backend_d3d12"))]
fn platform(_config: &Config) -> Result<Box<dyn d3d12::api::Platform>, Error> {
    Ok(Box::new(d3d12::NativePlatform::new()))
}

/// Off Windows only the software adapter exists, standing in for WARP.
#[cfg(all(not(windows), feature = "backend_d3d12"))]
fn platform(config: &Config) -> Result<Box<dyn d3d12::api::Platform>, Error> {
    if !config.use_warp {
        return Err(Error::Unsupported(
            "hardware adapters need the native Direct3D 12 runtime".to_string(),
        ));
    }
    Ok(Box::new(d3d12::SoftwarePlatform::new()))
}

/// Creates the backend `config` asks for.
#[cfg(feature = "backend_d3d12")]
pub(crate) fn new_graphics(config: &Config) -> Result<Box<dyn Graphics>, Error> {
    let graphics = d3d12::Graphics12::new(platform(config)?, d3d12::Options::from(config))?;
    Ok(Box::new(graphics))
}

#[cfg(not(feature = "backend_d3d12"))]
pub(crate) fn new_graphics(_config: &Config) -> Result<Box<dyn Graphics>, Error> {
    Err(Error::Unsupported(
        "built without a graphics backend".to_string(),
    ))
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;

    #[test]
    fn hardware_adapters_are_unsupported_without_the_runtime() {
        let config = Config {
            use_warp: false,
            ..Config::default()
        };
        assert!(matches!(new_graphics(&config), Err(Error::Unsupported(_))));
        assert!(matches!(
            compile_hlsl("float4 PSMain() : SV_TARGET { return 0; }"),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn warp_runs_on_the_software_adapter() {
        let config = Config {
            use_warp: true,
            ..Config::default()
        };
        assert!(new_graphics(&config).is_ok());
    }
}

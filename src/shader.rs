// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Game-side shader handles.

use crate::error::Error;
use crate::graphics::ShaderId;
use crate::shader_ir::ShaderIr;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

struct ShaderInner {
    ir: Arc<ShaderIr>,
    driver: OnceLock<ShaderId>,
    disposed: AtomicBool,
}

#[derive(Clone)]
pub struct Shader(Arc<ShaderInner>);

impl Shader {
    pub(crate) fn new(ir: Arc<ShaderIr>) -> Self {
        Shader(Arc::new(ShaderInner {
            ir,
            driver: OnceLock::new(),
            disposed: AtomicBool::new(false),
        }))
    }

    pub fn ir(&self) -> &Arc<ShaderIr> {
        &self.0.ir
    }

    pub fn name(&self) -> &str {
        self.0.ir.name()
    }

    pub fn same(&self, other: &Shader) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn set_driver_id(&self, id: ShaderId) {
        if self.0.driver.set(id).is_err() {
            logwise::warn_sync!(
                "shader already has a backend id; ignoring {id}",
                id = id.to_string()
            );
        }
    }

    pub(crate) fn driver_id(&self) -> Result<ShaderId, Error> {
        self.0.driver.get().copied().ok_or_else(|| {
            Error::InvalidArgument("shader used before its creation command ran".to_string())
        })
    }

    pub(crate) fn mark_disposed(&self) -> bool {
        !self.0.disposed.swap(true, Ordering::AcqRel)
    }
}

impl Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shader")
            .field("name", &self.0.ir.name())
            .field("driver", &self.0.driver.get())
            .finish()
    }
}

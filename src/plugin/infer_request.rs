use std::collections::HashMap;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::execution::buffer::{f32_bytes, f32_values};
use crate::execution::Executable;
use crate::model::{Precision, TensorDesc};

/// Host-side buffer exchanged with the inference engine
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    desc: TensorDesc,
    data: Vec<u8>,
}

impl Blob {
    /// Allocate a zeroed blob.
    pub fn new(desc: TensorDesc) -> Result<Self> {
        let data = vec![0; desc.byte_len()?];
        Ok(Self { desc, data })
    }

    /// Wrap existing bytes; the length must match the desc.
    pub fn from_bytes(desc: TensorDesc, data: Vec<u8>) -> Result<Self> {
        let expected = desc.byte_len()?;
        if data.len() != expected {
            return Err(Error::ShapeMismatch(format!(
                "{} blob {:?} needs {} bytes, got {}",
                desc.precision,
                desc.dims,
                expected,
                data.len()
            )));
        }
        Ok(Self { desc, data })
    }

    pub fn from_f32(dims: &[usize], values: &[f32]) -> Result<Self> {
        Self::from_bytes(TensorDesc::new(Precision::Fp32, dims), f32_bytes(values))
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Contents of an FP32 blob
    pub fn to_f32(&self) -> Result<Vec<f32>> {
        if self.desc.precision != Precision::Fp32 {
            return Err(Error::UnsupportedType(format!(
                "blob holds {} data, not FP32",
                self.desc.precision
            )));
        }
        Ok(f32_values(&self.data))
    }
}

/// One synchronous inference over a compiled network
#[derive(Debug)]
pub struct InferRequest {
    executable: Executable,
    inputs: HashMap<String, Blob>,
    outputs: HashMap<String, Blob>,
}

impl InferRequest {
    /// Allocate one host blob per program input and output.
    pub(crate) fn new(executable: Executable) -> Result<Self> {
        let program = executable.program();
        let mut inputs = HashMap::new();
        for port in &program.inputs {
            let desc = TensorDesc::new(Precision::from_data_type(port.dtype), &port.shape);
            inputs.insert(port.name.clone(), Blob::new(desc)?);
        }
        let mut outputs = HashMap::new();
        for port in &program.outputs {
            let desc = TensorDesc::new(Precision::from_data_type(port.dtype), &port.shape);
            outputs.insert(port.name.clone(), Blob::new(desc)?);
        }
        Ok(Self {
            executable,
            inputs,
            outputs,
        })
    }

    pub fn input_blob(&self, name: &str) -> Result<&Blob> {
        self.inputs
            .get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("no input blob named '{}'", name)))
    }

    pub fn input_blob_mut(&mut self, name: &str) -> Result<&mut Blob> {
        self.inputs
            .get_mut(name)
            .ok_or_else(|| Error::InvalidArgument(format!("no input blob named '{}'", name)))
    }

    pub fn output_blob(&self, name: &str) -> Result<&Blob> {
        self.outputs
            .get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("no output blob named '{}'", name)))
    }

    /// Replace an input blob; its desc must match the network input.
    pub fn set_input(&mut self, name: &str, blob: Blob) -> Result<()> {
        let current = self.input_blob_mut(name)?;
        if current.desc != blob.desc {
            return Err(Error::ShapeMismatch(format!(
                "input '{}' expects {} {:?}, got {} {:?}",
                name, current.desc.precision, current.desc.dims, blob.desc.precision, blob.desc.dims
            )));
        }
        *current = blob;
        Ok(())
    }

    /// Copy inputs to the device, run, copy outputs back.
    pub fn infer(&mut self) -> Result<()> {
        debug!("infer {} started", self.executable.program().name);
        self.sync_input()?;
        self.executable.run()?;
        self.sync_output()?;
        debug!("infer {} finished", self.executable.program().name);
        Ok(())
    }

    fn sync_input(&mut self) -> Result<()> {
        for (name, blob) in &self.inputs {
            let view = self.executable.input_view_mut(name)?;
            if view.len() != blob.data.len() {
                return Err(Error::Execution(format!(
                    "input '{}': host blob has {} bytes, device buffer {}",
                    name,
                    blob.data.len(),
                    view.len()
                )));
            }
            view.copy_from_slice(&blob.data);
            trace!("copied input '{}' ({} bytes) to device", name, view.len());
        }
        Ok(())
    }

    fn sync_output(&mut self) -> Result<()> {
        for (name, blob) in &mut self.outputs {
            let view = self.executable.output_view(name)?;
            if view.len() != blob.data.len() {
                return Err(Error::Execution(format!(
                    "output '{}': device buffer has {} bytes, host blob {}",
                    name,
                    view.len(),
                    blob.data.len()
                )));
            }
            blob.data.copy_from_slice(view);
            trace!("copied output '{}' ({} bytes) to host", name, view.len());
        }
        Ok(())
    }
}

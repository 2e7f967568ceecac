//! Model parameters persisted as safetensors files.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{ExperimentErr, Result, arch::GenerativeModel};

/// The name of the flat parameter tensor inside a checkpoint.
pub const PARAMS_TENSOR: &str = "params";
const EPOCH_KEY: &str = "epoch";

/// The path of the checkpoint written after `epoch`:
/// `{run_dir}/checkpoints/epoch={epoch}.safetensors`.
pub fn checkpoint_path<P: AsRef<Path>>(run_dir: P, epoch: usize) -> PathBuf {
    run_dir
        .as_ref()
        .join("checkpoints")
        .join(format!("epoch={epoch}.safetensors"))
}

/// Writes the model's parameters to `path`, creating its parent directory.
///
/// # Errors
/// Returns an `ExperimentErr` if the file cannot be serialized or written.
pub fn save_checkpoint<M: GenerativeModel, P: AsRef<Path>>(
    model: &M,
    path: P,
    epoch: usize,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let params = model.params();
    let bytes: &[u8] = bytemuck::cast_slice(params);
    let view = TensorView::new(Dtype::F32, vec![params.len()], bytes)?;
    let metadata = HashMap::from([(EPOCH_KEY.to_string(), epoch.to_string())]);

    let serialized = safetensors::serialize([(PARAMS_TENSOR, view)], &Some(metadata))?;
    fs::write(path, serialized)?;
    Ok(())
}

/// Restores the model's parameters from the checkpoint at `path`.
///
/// # Returns
/// The epoch the checkpoint was written after.
///
/// # Errors
/// Returns an `ExperimentErr` if the file cannot be read, isn't a parameter checkpoint,
/// or holds a different amount of parameters than the model.
pub fn load_checkpoint<M: GenerativeModel, P: AsRef<Path>>(
    model: &mut M,
    path: P,
) -> Result<usize> {
    let bytes = fs::read(path)?;

    let (_, metadata) = SafeTensors::read_metadata(&bytes)?;
    let epoch = metadata
        .metadata()
        .as_ref()
        .and_then(|meta| meta.get(EPOCH_KEY))
        .and_then(|epoch| epoch.parse().ok())
        .ok_or_else(|| ExperimentErr::Checkpoint("missing epoch metadata".into()))?;

    let tensors = SafeTensors::deserialize(&bytes)?;
    let view = tensors.tensor(PARAMS_TENSOR)?;
    if view.dtype() != Dtype::F32 {
        return Err(ExperimentErr::Checkpoint(format!(
            "expected f32 parameters, got {:?}",
            view.dtype()
        )));
    }

    let loaded: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());

    let (params, _) = model.params_and_grad();
    if loaded.len() != params.len() {
        return Err(ExperimentErr::SizeMismatch {
            what: "checkpoint parameters",
            got: loaded.len(),
            expected: params.len(),
        });
    }

    params.copy_from_slice(&loaded);
    Ok(epoch)
}

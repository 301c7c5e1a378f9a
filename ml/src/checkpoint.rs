//! Saving and restoring the variables of a [`ModelContext`].
//!
//! Checkpoints are written as `.npz` archives with one array per variable, named like the
//! variable. They can be restored from `.npz` archives (files or in-memory buffers) or
//! from JSON files that map every variable name to its flattened values.
use crate::context::{ModelContext, Variable};
use crate::errors::{ModelError, ModelResult};
use crate::WeightPrecision;
use log::{debug, info};
use ndarray::{Array, ArrayD, IxDyn};
use ndarray_npy::{NpzReader, NpzWriter};
use serde_json::{self, Map, Value};
use std::io::{Cursor, Read, Seek};
use std::{fs, path::Path};

pub trait WeightLoader {
    /// Returns the weight with the given name, which has to have the given shape.
    fn get_weight(
        &mut self,
        param_name: &str,
        shape: &[usize],
    ) -> ModelResult<ArrayD<WeightPrecision>>;
}

pub struct JsonWeightLoader {
    content: Map<String, Value>,
}

impl JsonWeightLoader {
    pub fn new<P: AsRef<Path>>(path: P) -> ModelResult<JsonWeightLoader> {
        let raw_file = fs::read_to_string(path)?;
        let parsed: Value =
            serde_json::from_str(&raw_file).map_err(|_| ModelError::WeightFormatError)?;
        let content = parsed
            .as_object()
            .ok_or(ModelError::WeightFormatError)?
            .clone();
        Ok(JsonWeightLoader { content })
    }
}

impl WeightLoader for JsonWeightLoader {
    /// Weights are stored in a FLATTENED form (to facilitate working with JSON),
    /// they are reshaped to the requested shape.
    fn get_weight(
        &mut self,
        param_name: &str,
        shape: &[usize],
    ) -> ModelResult<ArrayD<WeightPrecision>> {
        let raw_arr = self
            .content
            .get(param_name)
            .ok_or_else(|| ModelError::VariableKeyError(param_name.to_string()))?;

        let raw_value_vector = match raw_arr {
            Value::Array(v) => v,
            _ => return Err(ModelError::WeightFormatError),
        };

        let weight_vector: Result<Vec<_>, _> = raw_value_vector
            .iter()
            .map(|j| {
                j.as_f64()
                    .map(|v| v as WeightPrecision)
                    .ok_or(ModelError::WeightFormatError)
            })
            .collect();

        Ok(Array::from_shape_vec(IxDyn(shape), weight_vector?)?)
    }
}

pub struct NpzWeightLoader<R>
where
    R: Seek + Read,
{
    handle: R,
}

impl NpzWeightLoader<std::fs::File> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> ModelResult<NpzWeightLoader<std::fs::File>> {
        let handle = std::fs::File::open(path)?;
        Ok(NpzWeightLoader { handle })
    }
}

impl<'a> NpzWeightLoader<Cursor<&'a [u8]>> {
    pub fn from_buffer(bytes_array: &'a [u8]) -> NpzWeightLoader<Cursor<&'a [u8]>> {
        NpzWeightLoader {
            handle: Cursor::new(bytes_array),
        }
    }
}

impl<R> NpzWeightLoader<R>
where
    R: Seek + Read,
{
    /// Names of all arrays in the archive.
    pub fn names(&mut self) -> ModelResult<Vec<String>> {
        let mut reader = NpzReader::new(&mut self.handle)?;
        Ok(reader
            .names()?
            .into_iter()
            .map(|n| n.trim_end_matches(".npy").to_string())
            .collect())
    }

    /// Reads the array with the given name, whatever its shape.
    pub fn by_name(&mut self, param_name: &str) -> ModelResult<ArrayD<WeightPrecision>> {
        // The reader in the npy package has to be mut, so we recreate it for every read.
        let mut reader = NpzReader::new(&mut self.handle)?;
        Ok(reader.by_name(param_name)?)
    }
}

impl<R> WeightLoader for NpzWeightLoader<R>
where
    R: Seek + Read,
{
    fn get_weight(
        &mut self,
        param_name: &str,
        shape: &[usize],
    ) -> ModelResult<ArrayD<WeightPrecision>> {
        let arr = self.by_name(param_name)?;
        if arr.shape() != shape {
            return Err(ModelError::InvalidShapeError(format!(
                "weight {} has shape {:?}, expected {:?}",
                param_name,
                arr.shape(),
                shape
            )));
        }
        Ok(arr)
    }
}

/// Writes the variables into an `.npz` archive at path.
pub fn save_variables<P: AsRef<Path>>(variables: &[&Variable], path: P) -> ModelResult<()> {
    let file = fs::File::create(path.as_ref())?;
    let mut npz = NpzWriter::new(file);
    for var in variables {
        npz.add_array(var.name.as_str(), &var.value)?;
    }
    npz.finish()?;
    info!(
        "Saved {} variables to {}",
        variables.len(),
        path.as_ref().display()
    );
    Ok(())
}

/// Overwrites every variable of the context that is listed in `names` with the value from
/// the loader. Returns the number of restored variables.
pub fn restore_variables<L: WeightLoader>(
    ctx: &mut ModelContext,
    loader: &mut L,
    names: &[String],
) -> ModelResult<usize> {
    for name in names {
        let shape = ctx
            .variable(name)
            .ok_or_else(|| ModelError::VariableKeyError(name.to_string()))?
            .value
            .shape()
            .to_vec();
        let value = loader.get_weight(name, &shape)?;
        ctx.assign(name, value)?;
        debug!("Restored variable {}", name);
    }
    Ok(names.len())
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use super::*;
    use crate::initializers::Initializer;
    use ndarray::{array, Array1, Array2};
    use tempfile::tempdir;

    #[test]
    fn test_json_weight_loader() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("temp-weights.txt");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            // Rust escapes curly braces by doubling them
            "{{ \"arr1\": [0.0, 1e-3, 1.0], \"arr2\": [0.0, 1.0, 2.0, 3.0]}}"
        )
        .unwrap();

        let mut loader = JsonWeightLoader::new(file_path).unwrap();

        assert_eq!(
            loader.get_weight("arr1", &[3]).unwrap(),
            array![0.0, 1e-3, 1.0].into_dyn()
        );
        assert_eq!(
            loader.get_weight("arr2", &[2, 2]).unwrap(),
            array![[0.0, 1.0], [2.0, 3.0]].into_dyn()
        );
        assert!(loader.get_weight("arr2", &[3]).is_err());
        assert!(loader.get_weight("missing", &[3]).is_err());

        drop(file);
        dir.close().unwrap();
    }

    #[test]
    fn test_npz_weight_loader() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("temp-weights.npz");
        let file = File::create(&file_path).unwrap();
        let mut npz = NpzWriter::new(file);
        let a: Array2<f32> = array![[1., 2., 3.], [4., 5., 6.]];
        let b: Array1<f32> = array![7., 8., 9.];
        npz.add_array("a", &a).unwrap();
        npz.add_array("b", &b).unwrap();
        npz.finish().unwrap();

        let mut loader = NpzWeightLoader::from_path(&file_path).unwrap();

        assert_eq!(loader.get_weight("a", &[2, 3]).unwrap(), a.into_dyn());
        assert_eq!(loader.get_weight("b", &[3]).unwrap(), b.into_dyn());
        assert!(loader.get_weight("b", &[4]).is_err());
        assert_eq!(loader.by_name("a").unwrap().shape(), &[2, 3]);

        let bytes = fs::read(&file_path).unwrap();
        let mut names = NpzWeightLoader::from_buffer(&bytes).names().unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);

        dir.close().unwrap();
    }

    #[test]
    fn test_save_and_restore() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.npz");

        let mut ctx = ModelContext::new(Some(3));
        ctx.scoped("conv1", |ctx| {
            ctx.get_variable("W", &[3, 3, 1, 4], &Initializer::he(), true)
        })
        .unwrap();
        ctx.get_variable("moving_mean", &[4], &Initializer::Constant(0.5), false)
            .unwrap();
        ctx.add_required_non_trainable("moving_mean").unwrap();
        save_variables(&ctx.variables_to_save(&[]).unwrap(), &path).unwrap();

        let mut restored = ModelContext::new(Some(4));
        restored
            .scoped("conv1", |ctx| {
                ctx.get_variable("W", &[3, 3, 1, 4], &Initializer::he(), true)
            })
            .unwrap();
        restored
            .get_variable("moving_mean", &[4], &Initializer::Zeros, false)
            .unwrap();
        assert_ne!(restored.variable("conv1/W"), ctx.variable("conv1/W"));

        let mut loader = NpzWeightLoader::from_path(&path).unwrap();
        let names = vec!["conv1/W".to_string(), "moving_mean".to_string()];
        assert_eq!(restore_variables(&mut restored, &mut loader, &names).unwrap(), 2);

        assert_eq!(restored.variable("conv1/W"), ctx.variable("conv1/W"));
        assert_eq!(restored.variable("moving_mean"), ctx.variable("moving_mean"));
    }
}

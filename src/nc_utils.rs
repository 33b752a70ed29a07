use ndarray::{ArrayD, Axis};
use netcdf::{types::{FloatType, IntType}, Extents};

/// Error returned when a geometric transform is applied to an array
/// with too few axes for it to make sense.
#[derive(Debug, thiserror::Error)]
#[error("cannot rotate the trailing plane of a {0}-dimensional array")]
pub struct RotationError(pub usize);

/// A type that can hold any numeric array stored in a netCDF file,
/// so that a variable can be shuttled to another file at its source
/// datatype. Best created by reading a variable with `get_from`.
pub enum NcArray {
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

/// Dispatch over every variant, binding the inner array as `$arr` and
/// rewrapping the result of `$expr` in the same variant.
macro_rules! map_ncarray {
    ($value:expr, $arr:ident => $expr:expr) => {
        match $value {
            NcArray::I8($arr) => NcArray::I8($expr),
            NcArray::I16($arr) => NcArray::I16($expr),
            NcArray::I32($arr) => NcArray::I32($expr),
            NcArray::I64($arr) => NcArray::I64($expr),
            NcArray::U8($arr) => NcArray::U8($expr),
            NcArray::U16($arr) => NcArray::U16($expr),
            NcArray::U32($arr) => NcArray::U32($expr),
            NcArray::U64($arr) => NcArray::U64($expr),
            NcArray::F32($arr) => NcArray::F32($expr),
            NcArray::F64($arr) => NcArray::F64($expr),
        }
    };
}

/// Dispatch over every variant, evaluating `$expr` with the inner array
/// bound as `$arr`. `$expr` must have the same type for every variant.
macro_rules! with_ncarray {
    ($value:expr, $arr:ident => $expr:expr) => {
        match $value {
            NcArray::I8($arr) => $expr,
            NcArray::I16($arr) => $expr,
            NcArray::I32($arr) => $expr,
            NcArray::I64($arr) => $expr,
            NcArray::U8($arr) => $expr,
            NcArray::U16($arr) => $expr,
            NcArray::U32($arr) => $expr,
            NcArray::U64($arr) => $expr,
            NcArray::F32($arr) => $expr,
            NcArray::F64($arr) => $expr,
        }
    };
}

impl NcArray {
    /// Retrieve data from a netCDF variable and construct the appropriate variant.
    ///
    /// Compound, opaque, enum, variable length, string, and char types are
    /// not supported; the CYGNSS products only carry plain numeric arrays.
    pub fn get_from(var: &netcdf::Variable) -> netcdf::Result<Self> {
        match var.vartype() {
            netcdf::types::NcVariableType::Int(IntType::I8) => {
                let values = var.get::<i8, _>(Extents::All)?;
                Ok(Self::I8(values))
            },
            netcdf::types::NcVariableType::Int(IntType::I16) => {
                let values = var.get::<i16, _>(Extents::All)?;
                Ok(Self::I16(values))
            },
            netcdf::types::NcVariableType::Int(IntType::I32) => {
                let values = var.get::<i32, _>(Extents::All)?;
                Ok(Self::I32(values))
            },
            netcdf::types::NcVariableType::Int(IntType::I64) => {
                let values = var.get::<i64, _>(Extents::All)?;
                Ok(Self::I64(values))
            },
            netcdf::types::NcVariableType::Int(IntType::U8) => {
                let values = var.get::<u8, _>(Extents::All)?;
                Ok(Self::U8(values))
            },
            netcdf::types::NcVariableType::Int(IntType::U16) => {
                let values = var.get::<u16, _>(Extents::All)?;
                Ok(Self::U16(values))
            },
            netcdf::types::NcVariableType::Int(IntType::U32) => {
                let values = var.get::<u32, _>(Extents::All)?;
                Ok(Self::U32(values))
            },
            netcdf::types::NcVariableType::Int(IntType::U64) => {
                let values = var.get::<u64, _>(Extents::All)?;
                Ok(Self::U64(values))
            },
            netcdf::types::NcVariableType::Float(FloatType::F32) => {
                let values = var.get::<f32, _>(Extents::All)?;
                Ok(Self::F32(values))
            },
            netcdf::types::NcVariableType::Float(FloatType::F64) => {
                let values = var.get::<f64, _>(Extents::All)?;
                Ok(Self::F64(values))
            },
            other => {
                Err(format!(
                    "unsupported netCDF type {other:?} on variable '{}'",
                    var.name()
                )
                .into())
            },
        }
    }

    pub fn ndim(&self) -> usize {
        with_ncarray!(self, arr => arr.ndim())
    }

    pub fn shape(&self) -> Vec<usize> {
        with_ncarray!(self, arr => arr.shape().to_vec())
    }

    /// Quarter-turn the trailing two axes counter-clockwise.
    ///
    /// This matches numpy's `rot90(a, k=1)` convention: for a 2-D array,
    /// `out[i, j] == a[j, ncols - 1 - i]`, i.e. the last column of the
    /// input becomes the first row of the output. Higher-dimensional
    /// arrays are rotated plane-by-plane over their leading axes.
    pub fn rot90_trailing(self) -> Result<Self, RotationError> {
        if self.ndim() < 2 {
            return Err(RotationError(self.ndim()));
        }
        Ok(map_ncarray!(self, arr => rot90(arr)))
    }

    /// Insert a new leading axis of length 1, e.g. to place a 2-D daily
    /// grid under a length-1 time dimension.
    pub fn insert_leading_axis(self) -> Self {
        map_ncarray!(self, arr => arr.insert_axis(Axis(0)))
    }

    /// Replace every NaN entry with `fill`, returning the count of entries
    /// changed. Integer arrays cannot hold NaN and are left untouched.
    pub fn replace_nan(&mut self, fill: f64) -> usize {
        match self {
            NcArray::F32(arr) => {
                let mut n_changed = 0;
                arr.mapv_inplace(|v| {
                    if v.is_nan() {
                        n_changed += 1;
                        fill as f32
                    } else {
                        v
                    }
                });
                n_changed
            },
            NcArray::F64(arr) => {
                let mut n_changed = 0;
                arr.mapv_inplace(|v| {
                    if v.is_nan() {
                        n_changed += 1;
                        fill
                    } else {
                        v
                    }
                });
                n_changed
            },
            _ => 0,
        }
    }

    /// Create a variable in a netCDF file at this array's datatype and
    /// write the data to it. If `fill` is given, it is declared as the
    /// variable's `_FillValue` (cast to the variable's type) before any
    /// data is written.
    pub fn put_to<'f>(
        &self,
        file: &'f mut netcdf::FileMut,
        name: &str,
        dims: &[&str],
        fill: Option<f64>,
    ) -> netcdf::Result<netcdf::VariableMut<'f>> {
        macro_rules! put_variant {
            ($($variant:ident => $ty:ty),+ $(,)?) => {
                match self {
                    $(
                        NcArray::$variant(arr) => {
                            let mut var = file.add_variable::<$ty>(name, dims)?;
                            if let Some(f) = fill {
                                var.put_attribute("_FillValue", f as $ty)?;
                            }
                            put_full(&mut var, arr)?;
                            Ok(var)
                        }
                    )+
                }
            };
        }

        put_variant!(
            I8 => i8,
            I16 => i16,
            I32 => i32,
            I64 => i64,
            U8 => u8,
            U16 => u16,
            U32 => u32,
            U64 => u64,
            F32 => f32,
            F64 => f64,
        )
    }
}

/// Counter-clockwise quarter turn of the trailing plane: swap the last
/// two axes, then reverse the new second-to-last axis. The result is
/// repacked into standard layout so it can be written out directly.
fn rot90<T: Clone>(mut arr: ArrayD<T>) -> ArrayD<T> {
    let n = arr.ndim();
    arr.swap_axes(n - 2, n - 1);
    arr.invert_axis(Axis(n - 2));
    arr.as_standard_layout().to_owned()
}

/// Write the whole of `arr` to `var`, with extents spelled out from the
/// array shape so that writes into unlimited dimensions extend them.
fn put_full<T: netcdf::NcTypeDescriptor + Copy>(
    var: &mut netcdf::VariableMut,
    arr: &ArrayD<T>,
) -> netcdf::Result<()> {
    let s = arr.shape();
    match s.len() {
        1 => var.put(arr.view(), 0..s[0]),
        2 => var.put(arr.view(), (0..s[0], 0..s[1])),
        3 => var.put(arr.view(), (0..s[0], 0..s[1], 0..s[2])),
        4 => var.put(arr.view(), (0..s[0], 0..s[1], 0..s[2], 0..s[3])),
        _ => var.put(arr.view(), Extents::All),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn test_rot90_plane() {
        let arr = NcArray::I32(array![[1, 2, 3], [4, 5, 6]].into_dyn());
        let rotated = arr.rot90_trailing().unwrap();
        match rotated {
            NcArray::I32(out) => {
                assert_eq!(out, array![[3, 6], [2, 5], [1, 4]].into_dyn());
            }
            _ => panic!("rotation changed the array datatype"),
        }
    }

    #[test]
    fn test_rot90_trailing_axes_of_cube() {
        let arr = NcArray::I32(
            array![[[1, 2, 3], [4, 5, 6]], [[7, 8, 9], [10, 11, 12]]].into_dyn(),
        );
        let rotated = arr.rot90_trailing().unwrap();
        match rotated {
            NcArray::I32(out) => {
                assert_eq!(out.shape(), &[2, 3, 2]);
                assert_eq!(
                    out,
                    array![[[3, 6], [2, 5], [1, 4]], [[9, 12], [8, 11], [7, 10]]].into_dyn()
                );
            }
            _ => panic!("rotation changed the array datatype"),
        }
    }

    #[test]
    fn test_rot90_rejects_vectors() {
        let arr = NcArray::F32(array![1.0f32, 2.0].into_dyn());
        assert!(arr.rot90_trailing().is_err());
    }

    #[test]
    fn test_insert_leading_axis() {
        let arr = NcArray::F64(array![[1.0, 2.0], [3.0, 4.0]].into_dyn());
        let expanded = arr.insert_leading_axis();
        assert_eq!(expanded.shape(), vec![1, 2, 2]);
    }

    #[test]
    fn test_replace_nan_in_floats() {
        let mut arr = NcArray::F32(array![[1.0f32, f32::NAN], [f32::NAN, 4.0]].into_dyn());
        let n = arr.replace_nan(-9999.0);
        assert_eq!(n, 2);
        match arr {
            NcArray::F32(out) => {
                assert!(out.iter().all(|v| !v.is_nan()));
                assert_eq!(out, array![[1.0f32, -9999.0], [-9999.0, 4.0]].into_dyn());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_replace_nan_skips_integers() {
        let mut arr = NcArray::I16(array![[1i16, 2], [3, 4]].into_dyn());
        assert_eq!(arr.replace_nan(-9999.0), 0);
    }
}

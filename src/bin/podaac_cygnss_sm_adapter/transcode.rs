//! The transcoding pass: reshape every source variable into the PODAAC
//! layout and write the configured metadata alongside it.

use error_stack::ResultExt;
use itertools::Itertools;

use cygnss_podaac::nc_utils::NcArray;

use crate::config::{AdapterConfig, VariablePlan, VarTransform};
use crate::constants::{
    LAT_DIM_NAME, LON_DIM_NAME, SOURCE_COLUMNS_DIM, SOURCE_ROWS_DIM, TIMESLICE_DIM_NAME,
    TIME_DIM_NAME,
};
use crate::AdapterError;

/// Write the fully populated output file described by `config`.
///
/// The source is consumed in one pass over its declared variables; the
/// output is synced after every variable write so a crash part-way
/// through leaves as much intact as the container format allows.
pub(crate) fn transcode(
    source: &netcdf::File,
    config: &AdapterConfig,
) -> error_stack::Result<(), AdapterError> {
    let mut target = netcdf::create(&config.output_path).change_context_lazy(|| {
        AdapterError::context(format!(
            "creating the output file {}",
            config.output_path.display()
        ))
    })?;

    // The time dimension and variable come first; everything else in the
    // schema hangs off them.
    if config.variant.growable_time() {
        target
            .add_unlimited_dimension(TIME_DIM_NAME)
            .change_context_lazy(|| AdapterError::context("creating the time dimension"))?;
    } else {
        target
            .add_dimension(TIME_DIM_NAME, 1)
            .change_context_lazy(|| AdapterError::context("creating the time dimension"))?;
    }
    let mut time_var = target
        .add_variable::<f32>(TIME_DIM_NAME, &[TIME_DIM_NAME])
        .change_context_lazy(|| AdapterError::context("creating the time variable"))?;
    for (attr, value) in &config.time_attributes {
        time_var
            .put_attribute(attr, value.clone())
            .change_context_lazy(|| {
                AdapterError::context(format!("adding '{attr}' attribute to the time variable"))
            })?;
    }
    time_var
        .put_values(&[config.time_value as f32], (0,))
        .change_context_lazy(|| AdapterError::context("writing the time variable"))?;

    copy_dimensions(source, &mut target)?;

    for plan in &config.plans {
        log::debug!("Writing variable '{}'", plan.name);
        write_variable(source, &mut target, plan)?;
        target
            .sync()
            .change_context_lazy(|| AdapterError::context("syncing the output file"))?;
    }

    for (name, value) in &config.global_attributes {
        target
            .add_attribute(name, value.clone())
            .change_context_lazy(|| {
                AdapterError::context(format!("adding global attribute '{name}'"))
            })?;
    }
    target
        .sync()
        .change_context_lazy(|| AdapterError::context("syncing the output file"))?;
    Ok(())
}

/// Carry every source dimension except `time` into the output, mapping
/// the plane dimensions to their final names. The upstream grids call
/// them `rows` and `columns`; the PODAAC schema calls them `lat` and
/// `lon`. The upstream scripts renamed them after writing all variables,
/// but resolving the final names up front produces the same schema.
fn copy_dimensions(
    source: &netcdf::File,
    target: &mut netcdf::FileMut,
) -> error_stack::Result<(), AdapterError> {
    for dim in source.dimensions() {
        let name = dim.name();
        if name == TIME_DIM_NAME {
            continue;
        }
        let out_name = output_dim_name(name);
        if dim.is_unlimited() {
            target
                .add_unlimited_dimension(&out_name)
                .change_context_lazy(|| {
                    AdapterError::context(format!("creating dimension '{out_name}'"))
                })?;
        } else {
            target
                .add_dimension(&out_name, dim.len())
                .change_context_lazy(|| {
                    AdapterError::context(format!("creating dimension '{out_name}'"))
                })?;
        }
    }
    Ok(())
}

fn output_dim_name(name: String) -> String {
    if name == SOURCE_ROWS_DIM {
        LAT_DIM_NAME.to_string()
    } else if name == SOURCE_COLUMNS_DIM {
        LON_DIM_NAME.to_string()
    } else {
        name
    }
}

/// Read one source variable, apply its fill substitution and geometric
/// transform, and write it to the output with its configured attributes.
fn write_variable(
    source: &netcdf::File,
    target: &mut netcdf::FileMut,
    plan: &VariablePlan,
) -> error_stack::Result<(), AdapterError> {
    let var = source
        .variable(&plan.name)
        .ok_or_else(|| AdapterError::MissingVariable(plan.name.clone()))?;
    let mut data = NcArray::get_from(&var).change_context_lazy(|| {
        AdapterError::context(format!("reading variable '{}'", plan.name))
    })?;

    if let Some(fill) = plan.fill {
        // The upstream release scripts compared entries against NaN with
        // `==`, which never matches; substituting for real here is a
        // deliberate fix.
        let n_changed = data.replace_nan(fill);
        if n_changed > 0 {
            log::debug!(
                "Replaced {n_changed} missing entries in '{}' with {fill}",
                plan.name
            );
        }
    }

    let (data, dims) = match plan.transform {
        VarTransform::Coordinate2d => {
            let data = rotate(data, &plan.name)?;
            (data, vec![LAT_DIM_NAME.to_string(), LON_DIM_NAME.to_string()])
        }
        VarTransform::SubdailyCube => {
            let data = rotate(data, &plan.name)?;
            let dims = vec![
                TIMESLICE_DIM_NAME.to_string(),
                LAT_DIM_NAME.to_string(),
                LON_DIM_NAME.to_string(),
            ];
            (data, dims)
        }
        VarTransform::DailyGrid => {
            let data = rotate(data, &plan.name)?.insert_leading_axis();
            let dims = vec![
                TIME_DIM_NAME.to_string(),
                LAT_DIM_NAME.to_string(),
                LON_DIM_NAME.to_string(),
            ];
            (data, dims)
        }
        VarTransform::PassThrough => {
            let dims = var
                .dimensions()
                .iter()
                .map(|d| output_dim_name(d.name()))
                .collect_vec();
            (data, dims)
        }
    };

    let dim_refs = dims.iter().map(|d| d.as_str()).collect_vec();
    let mut out_var = target_variable(target, &plan.name, &data, &dim_refs, plan.fill)?;
    for (attr, value) in &plan.attributes {
        out_var
            .put_attribute(attr, value.clone())
            .change_context_lazy(|| {
                AdapterError::context(format!(
                    "adding '{attr}' attribute to variable '{}'",
                    plan.name
                ))
            })?;
    }
    Ok(())
}

fn rotate(data: NcArray, varname: &str) -> error_stack::Result<NcArray, AdapterError> {
    data.rot90_trailing().change_context_lazy(|| {
        AdapterError::context(format!("rotating variable '{varname}'"))
    })
}

fn target_variable<'f>(
    target: &'f mut netcdf::FileMut,
    varname: &str,
    data: &NcArray,
    dims: &[&str],
    fill: Option<f64>,
) -> error_stack::Result<netcdf::VariableMut<'f>, AdapterError> {
    data.put_to(target, varname, dims, fill)
        .change_context_lazy(|| {
            AdapterError::context(format!("creating and writing variable '{varname}'"))
        })
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use chrono::{NaiveDate, NaiveDateTime};
    use netcdf::{AttributeValue, Extents};

    use crate::config::SchemaVariant;

    use super::*;

    const SOURCE_NAME: &str = "ucar_cu_cygnss_sm_v1_2017_077.nc";

    fn fixed_stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    /// Build a miniature source file with the upstream layout: plane
    /// arrays on (columns, rows), subdaily stacks on (timeslices,
    /// columns, rows), and NaN as the missing-data marker.
    fn write_source_file(path: &Path) {
        let mut ds = netcdf::create(path).unwrap();
        ds.add_dimension("timeslices", 4).unwrap();
        ds.add_dimension("columns", 5).unwrap();
        ds.add_dimension("rows", 3).unwrap();
        ds.add_dimension("timebounds", 2).unwrap();

        let lat = ndarray::Array2::from_shape_fn((5, 3), |(_, j)| 30.0 + j as f64);
        let lon = ndarray::Array2::from_shape_fn((5, 3), |(i, _)| -100.0 + i as f64);
        let mut v = ds.add_variable::<f64>("latitude", &["columns", "rows"]).unwrap();
        v.put(lat.view(), Extents::All).unwrap();
        let mut v = ds.add_variable::<f64>("longitude", &["columns", "rows"]).unwrap();
        v.put(lon.view(), Extents::All).unwrap();

        let mut sm_daily =
            ndarray::Array2::from_shape_fn((5, 3), |(i, j)| (i * 3 + j) as f32 / 10.0);
        sm_daily[[0, 0]] = f32::NAN;
        let mut v = ds.add_variable::<f32>("SM_daily", &["columns", "rows"]).unwrap();
        v.put(sm_daily.view(), Extents::All).unwrap();
        let mut v = ds.add_variable::<f32>("SIGMA_daily", &["columns", "rows"]).unwrap();
        v.put(sm_daily.view(), Extents::All).unwrap();

        let sm_subdaily = ndarray::Array3::from_shape_fn((4, 5, 3), |(t, i, j)| {
            (t * 100 + i * 10 + j) as f32
        });
        let mut v = ds
            .add_variable::<f32>("SM_subdaily", &["timeslices", "columns", "rows"])
            .unwrap();
        v.put(sm_subdaily.view(), Extents::All).unwrap();
        let mut v = ds
            .add_variable::<f32>("SIGMA_subdaily", &["timeslices", "columns", "rows"])
            .unwrap();
        v.put(sm_subdaily.view(), Extents::All).unwrap();

        let mut intervals =
            ndarray::Array2::from_shape_fn((4, 2), |(t, b)| (t * 6 + b * 6) as f32);
        intervals[[3, 1]] = f32::NAN;
        let mut v = ds
            .add_variable::<f32>("timeintervals", &["timeslices", "timebounds"])
            .unwrap();
        v.put(intervals.view(), Extents::All).unwrap();

        ds.add_attribute(
            "History",
            "Created 05-Jan-2019 by the UCAR/CU soil moisture processing chain",
        )
        .unwrap();
        ds.add_attribute("Version", "version 2.1").unwrap();
    }

    fn run_adapter(dir: &Path, variant: SchemaVariant) -> PathBuf {
        let src = dir.join(SOURCE_NAME);
        write_source_file(&src);
        let source = netcdf::open(&src).unwrap();
        let config = AdapterConfig::derive(&src, &source, variant, fixed_stamp()).unwrap();
        transcode(&source, &config).unwrap();
        config.output_path
    }

    fn string_attr(ds: &netcdf::File, name: &str) -> String {
        match ds.attribute(name).unwrap().value().unwrap() {
            AttributeValue::Str(s) => s,
            other => panic!("attribute '{name}' is not a string: {other:?}"),
        }
    }

    fn dim_names(var: &netcdf::Variable) -> Vec<String> {
        var.dimensions().iter().map(|d| d.name()).collect()
    }

    #[test]
    fn test_output_schema_v1() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = run_adapter(dir.path(), SchemaVariant::V1);
        assert_eq!(
            out_path.file_name().unwrap().to_string_lossy(),
            format!("_{SOURCE_NAME}")
        );
        let out = netcdf::open(&out_path).unwrap();

        let time_dim = out.dimension("time").unwrap();
        assert_eq!(time_dim.len(), 1);
        assert!(!time_dim.is_unlimited());
        assert_eq!(out.dimension("lat").unwrap().len(), 3);
        assert_eq!(out.dimension("lon").unwrap().len(), 5);
        assert_eq!(out.dimension("timeslices").unwrap().len(), 4);
        assert_eq!(out.dimension("timebounds").unwrap().len(), 2);

        // Day 77 of 2017, shifted to noon, as days since the 1970 epoch.
        let time = out.variable("time").unwrap();
        assert_eq!(time.get_values::<f32, _>(Extents::All).unwrap(), vec![17243.5]);

        let lat = out.variable("latitude").unwrap();
        assert_eq!(dim_names(&lat), vec!["lat", "lon"]);
        let lat_vals = lat.get::<f64, _>(Extents::All).unwrap();
        assert_eq!(lat_vals.shape(), &[3, 5]);
        // The quarter turn puts the northernmost row first.
        assert!(lat_vals.slice(ndarray::s![0, ..]).iter().all(|&v| v == 32.0));
        assert!(lat_vals.slice(ndarray::s![2, ..]).iter().all(|&v| v == 30.0));

        let sm_sub = out.variable("SM_subdaily").unwrap();
        assert_eq!(dim_names(&sm_sub), vec!["timeslices", "lat", "lon"]);
        let sub_vals = sm_sub.get::<f32, _>(Extents::All).unwrap();
        assert_eq!(sub_vals.shape(), &[4, 3, 5]);
        // out[t, i, j] == in[t, j, nrows - 1 - i] for the trailing plane.
        assert_eq!(sub_vals[[1, 0, 4]], (100 + 40 + 2) as f32);
        assert_eq!(sub_vals[[0, 2, 0]], 0.0);

        let sm_daily = out.variable("SM_daily").unwrap();
        assert_eq!(dim_names(&sm_daily), vec!["time", "lat", "lon"]);
        let daily_vals = sm_daily.get::<f32, _>(Extents::All).unwrap();
        assert_eq!(daily_vals.shape(), &[1, 3, 5]);
        assert!(daily_vals.iter().all(|v| !v.is_nan()));
        // The NaN that sat at source [0, 0] lands at [0, 2, 0] after the turn.
        assert_eq!(daily_vals[[0, 2, 0]], -9999.0);
        match sm_daily.attribute("_FillValue").unwrap().value().unwrap() {
            AttributeValue::Float(f) => assert_eq!(f, -9999.0),
            other => panic!("_FillValue has wrong type: {other:?}"),
        }

        let intervals = out.variable("timeintervals").unwrap();
        assert_eq!(dim_names(&intervals), vec!["timeslices", "timebounds"]);
        let ivals = intervals.get::<f32, _>(Extents::All).unwrap();
        assert!(ivals.iter().all(|v| !v.is_nan()));
        assert!(intervals.attribute("_FillValue").is_some());
    }

    #[test]
    fn test_output_schema_v1_grid() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = run_adapter(dir.path(), SchemaVariant::V1Grid);
        let out = netcdf::open(&out_path).unwrap();

        let time_dim = out.dimension("time").unwrap();
        assert!(time_dim.is_unlimited());
        assert_eq!(time_dim.len(), 1);

        // No noon shift for this variant.
        let time = out.variable("time").unwrap();
        assert_eq!(time.get_values::<f32, _>(Extents::All).unwrap(), vec![17243.0]);

        // timeintervals is outside this variant's fill list, so its NaN
        // survives and no fill value is declared.
        let intervals = out.variable("timeintervals").unwrap();
        assert!(intervals.attribute("_FillValue").is_none());
        let ivals = intervals.get::<f32, _>(Extents::All).unwrap();
        assert_eq!(ivals.iter().filter(|v| v.is_nan()).count(), 1);
    }

    #[test]
    fn test_global_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = run_adapter(dir.path(), SchemaVariant::V1);
        let out = netcdf::open(&out_path).unwrap();

        assert_eq!(string_attr(&out, "source"), SOURCE_NAME);
        assert_eq!(string_attr(&out, "time_coverage_start"), "2017-03-18T00:00:00");
        assert_eq!(string_attr(&out, "time_coverage_end"), "2017-03-18T23:59:59");
        assert_eq!(string_attr(&out, "date_created"), "2019-01-05T00:00:00");
        assert_eq!(string_attr(&out, "date_modified"), "2021-06-01T00:00:00");
        assert_eq!(string_attr(&out, "Conventions"), "CF-1.6,ACDD-1.3");
        assert!(string_attr(&out, "history")
            .ends_with(". Modified for PODAAC release 2021-06-01T00:00:00."));

        match out.attribute("version").unwrap().value().unwrap() {
            AttributeValue::Double(v) => assert_eq!(v, 2.1),
            other => panic!("version has wrong type: {other:?}"),
        }
        match out.attribute("geospatial_lat_min").unwrap().value().unwrap() {
            AttributeValue::Double(v) => assert_eq!(v, 30.0),
            other => panic!("geospatial_lat_min has wrong type: {other:?}"),
        }
        match out.attribute("geospatial_lon_max").unwrap().value().unwrap() {
            AttributeValue::Double(v) => assert_eq!(v, -96.0),
            other => panic!("geospatial_lon_max has wrong type: {other:?}"),
        }
    }

    #[test]
    fn test_metadata_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join(SOURCE_NAME);
        write_source_file(&src);
        let source = netcdf::open(&src).unwrap();

        let first =
            AdapterConfig::derive(&src, &source, SchemaVariant::V1, fixed_stamp()).unwrap();
        let second =
            AdapterConfig::derive(&src, &source, SchemaVariant::V1, fixed_stamp()).unwrap();
        assert_eq!(
            format!("{:?}", first.global_attributes),
            format!("{:?}", second.global_attributes)
        );
        assert_eq!(first.time_value, second.time_value);
    }

    #[test]
    fn test_unregistered_variable_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join(SOURCE_NAME);
        write_source_file(&src);
        {
            let mut ds = netcdf::append(&src).unwrap();
            let mut v = ds.add_variable::<f32>("soil_temperature", &["columns", "rows"]).unwrap();
            v.put_values(&vec![1.0f32; 15], Extents::All).unwrap();
        }

        let source = netcdf::open(&src).unwrap();
        let res = AdapterConfig::derive(&src, &source, SchemaVariant::V1, fixed_stamp());
        assert!(res.is_err());
        assert!(!dir.path().join(format!("_{SOURCE_NAME}")).exists());
    }

    #[test]
    fn test_missing_version_attribute_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join(SOURCE_NAME);
        {
            let mut ds = netcdf::create(&src).unwrap();
            ds.add_dimension("columns", 2).unwrap();
            ds.add_dimension("rows", 2).unwrap();
            let mut v = ds.add_variable::<f64>("latitude", &["columns", "rows"]).unwrap();
            v.put_values(&vec![0.0; 4], Extents::All).unwrap();
            let mut v = ds.add_variable::<f64>("longitude", &["columns", "rows"]).unwrap();
            v.put_values(&vec![0.0; 4], Extents::All).unwrap();
            ds.add_attribute("History", "Created 2019-01-05 processing run").unwrap();
        }

        let source = netcdf::open(&src).unwrap();
        let res = AdapterConfig::derive(&src, &source, SchemaVariant::V1, fixed_stamp());
        assert!(res.is_err());
    }
}

//! Derivation of the output file's metadata and per-variable write plans.
//!
//! Everything dynamic about a run is computed once here, before any output
//! is created: the output path, the reference date taken from the source
//! file name, the geospatial bounding box, the appended history line, and
//! a [`VariablePlan`] for every variable declared in the source. The
//! resulting [`AdapterConfig`] is immutable for the rest of the run, so a
//! source variable without a registered attribute set fails the run before
//! a partial output file exists.

use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime};
use error_stack::ResultExt;
use indexmap::IndexMap;
use ndarray::ArrayD;
use netcdf::{AttributeValue, Extents};

use cygnss_podaac::utils;

use crate::constants::{FILL_VALUE, HISTORY_ATTR, VERSION_ATTR};
use crate::AdapterError;

/// The two near-identical layouts the upstream release scripts produced,
/// consolidated behind one selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub(crate) enum SchemaVariant {
    /// Day-centered (noon) time stamp, a fixed length-1 time dimension,
    /// and `timeintervals` included in the fill list.
    V1,
    /// Midnight time stamp, a growable time dimension, and
    /// `timeintervals` left unfilled.
    V1Grid,
}

impl SchemaVariant {
    /// Whether the reference timestamp is shifted to the middle of the day.
    pub(crate) fn noon_shift(&self) -> bool {
        matches!(self, Self::V1)
    }

    /// Whether the output `time` dimension is growable rather than length 1.
    pub(crate) fn growable_time(&self) -> bool {
        matches!(self, Self::V1Grid)
    }

    /// Whether `varname` receives the configured fill value.
    pub(crate) fn fills_variable(&self, varname: &str) -> bool {
        match varname {
            "SIGMA_daily" | "SM_daily" | "SM_subdaily" | "SIGMA_subdaily" => true,
            "timeintervals" => matches!(self, Self::V1),
            _ => false,
        }
    }
}

/// How a variable's array and dimension tuple are reshaped on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VarTransform {
    /// 2-D latitude/longitude grid: quarter-turn, dims become `(lat, lon)`.
    Coordinate2d,
    /// 3-D `*_subdaily` stack: quarter-turn of the trailing plane, dims
    /// become `(timeslices, lat, lon)`.
    SubdailyCube,
    /// 2-D `*_daily` grid: quarter-turn plus a new length-1 leading axis,
    /// dims become `(time, lat, lon)`.
    DailyGrid,
    /// Anything else (including `time`-prefixed variables) is copied
    /// without geometric changes.
    PassThrough,
}

impl VarTransform {
    pub(crate) fn for_name(varname: &str) -> Self {
        if varname == "latitude" || varname == "longitude" {
            Self::Coordinate2d
        } else if varname.starts_with("time") {
            Self::PassThrough
        } else if varname.ends_with("_subdaily") {
            Self::SubdailyCube
        } else if varname.ends_with("_daily") {
            Self::DailyGrid
        } else {
            Self::PassThrough
        }
    }
}

/// Everything the transcoder needs to know about one source variable.
#[derive(Debug)]
pub(crate) struct VariablePlan {
    pub(crate) name: String,
    pub(crate) transform: VarTransform,
    /// The fill value to declare and substitute for NaN entries, if this
    /// variable is in the fill list.
    pub(crate) fill: Option<f64>,
    pub(crate) attributes: Vec<(&'static str, AttributeValue)>,
}

/// The immutable per-run configuration, derived once from the source file.
#[derive(Debug)]
pub(crate) struct AdapterConfig {
    pub(crate) variant: SchemaVariant,
    pub(crate) output_path: PathBuf,
    /// The reference timestamp parsed from the file name (noon-shifted for
    /// variants that center the day).
    pub(crate) reference: NaiveDateTime,
    /// [`Self::reference`] encoded as days since the 1970 epoch, matching
    /// the units declared on the output `time` variable.
    pub(crate) time_value: f64,
    pub(crate) plans: Vec<VariablePlan>,
    pub(crate) time_attributes: Vec<(&'static str, AttributeValue)>,
    pub(crate) global_attributes: IndexMap<&'static str, AttributeValue>,
}

impl AdapterConfig {
    /// Derive the full output configuration from the source file.
    ///
    /// `generated_stamp` is the wall-clock time recorded as the generation
    /// timestamp; it is injected by the caller so that runs can be made
    /// reproducible under test.
    pub(crate) fn derive(
        source_path: &Path,
        source: &netcdf::File,
        variant: SchemaVariant,
        generated_stamp: NaiveDateTime,
    ) -> error_stack::Result<Self, AdapterError> {
        let base_name = source_path
            .file_name()
            .ok_or_else(|| AdapterError::context("source path has no file name"))?
            .to_string_lossy()
            .to_string();
        let parent = source_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();
        // Outputs are written to adjacent files prefixed with "_"; an
        // existing file at that path is silently overwritten.
        let output_path = parent.join(format!("_{base_name}"));

        let mut reference = utils::doy_timestamp_from_filename(source_path)
            .change_context_lazy(|| {
                AdapterError::context("deriving the reference date from the source file name")
            })?;
        if variant.noon_shift() {
            reference += Duration::hours(12);
        }
        let time_value = utils::days_since_epoch(reference);

        let lat = read_coordinate(source, "latitude")?;
        let lon = read_coordinate(source, "longitude")?;
        let (lat_min, lat_max) = array_bounds(&lat);
        let (lon_min, lon_max) = array_bounds(&lon);

        let history = global_string_attr(source, HISTORY_ATTR)?;
        let version = utils::parse_version_attr(&global_string_attr(source, VERSION_ATTR)?)
            .change_context_lazy(|| {
                AdapterError::context(format!("parsing the '{VERSION_ATTR}' global attribute"))
            })?;
        let date_created = utils::history_creation_date(&history).change_context_lazy(|| {
            AdapterError::context(format!(
                "parsing the creation date out of the '{HISTORY_ATTR}' global attribute"
            ))
        })?;

        let mut plans = vec![];
        for var in source.variables() {
            let name = var.name();
            let attributes = variable_attributes(&name)
                .ok_or_else(|| AdapterError::UnregisteredVariable(name.clone()))?;
            plans.push(VariablePlan {
                transform: VarTransform::for_name(&name),
                fill: variant.fills_variable(&name).then_some(FILL_VALUE),
                name,
                attributes,
            });
        }

        let time_attributes = variable_attributes("time")
            .expect("the 'time' variable is registered in the static attribute table");

        let global_attributes = global_attribute_table(GlobalAttrInputs {
            source_name: &base_name,
            version,
            history: &history,
            lat_min,
            lat_max,
            lon_min,
            lon_max,
            reference,
            date_created,
            generated_stamp,
        });

        Ok(Self {
            variant,
            output_path,
            reference,
            time_value,
            plans,
            time_attributes,
            global_attributes,
        })
    }
}

/// The fixed attribute sets written on each output variable. Returns
/// `None` for variable names outside the known CYGNSS L3 SM layout.
fn variable_attributes(varname: &str) -> Option<Vec<(&'static str, AttributeValue)>> {
    let volume_comment = "units represent soil moisture content as a fractional volume (cm3 cm-3)";
    let attrs: Vec<(&'static str, AttributeValue)> = match varname {
        "SIGMA_daily" => vec![
            ("comment", volume_comment.into()),
            ("long_name", "standard deviation of soil moisture retrievals during the 24 hr period for the grid cell".into()),
            ("units", "1".into()),
            ("coverage_content_type", "modelResult".into()),
        ],
        "SM_daily" => vec![
            ("comment", volume_comment.into()),
            ("long_name", "mean soil moisture retrieval during the daily time periods for the grid cell".into()),
            ("units", "1".into()),
            ("coverage_content_type", "modelResult".into()),
        ],
        "SM_subdaily" => vec![
            ("comment", volume_comment.into()),
            ("long_name", "mean soil moisture retrieval during the sub-daily time periods for the grid cell".into()),
            ("units", "1".into()),
            ("coverage_content_type", "modelResult".into()),
        ],
        "SIGMA_subdaily" => vec![
            ("comment", volume_comment.into()),
            ("long_name", "standard deviation of soil moisture retrievals during the sub-daily time periods for the grid cell".into()),
            ("units", "1".into()),
            ("coverage_content_type", "modelResult".into()),
        ],
        "latitude" => vec![
            ("standard_name", "latitude".into()),
            ("long_name", "latitude".into()),
            ("axis", "Y".into()),
            ("units", "degrees_north".into()),
            ("coverage_content_type", "coordinate".into()),
        ],
        "longitude" => vec![
            ("standard_name", "longitude".into()),
            ("long_name", "longitude".into()),
            ("axis", "X".into()),
            ("units", "degrees_east".into()),
            ("coverage_content_type", "coordinate".into()),
        ],
        "time" => vec![
            ("standard_name", "time".into()),
            ("long_name", "time".into()),
            ("units", utils::TIME_UNITS.into()),
            ("coverage_content_type", "referenceInformation".into()),
        ],
        "timeintervals" => vec![
            ("long_name", "start and stop time for the sub-daily time periods".into()),
            ("units", "hours".into()),
            ("coverage_content_type", "referenceInformation".into()),
        ],
        _ => return None,
    };
    Some(attrs)
}

struct GlobalAttrInputs<'a> {
    source_name: &'a str,
    version: f64,
    history: &'a str,
    lat_min: f64,
    lat_max: f64,
    lon_min: f64,
    lon_max: f64,
    reference: NaiveDateTime,
    date_created: NaiveDateTime,
    generated_stamp: NaiveDateTime,
}

/// Assemble the full PODAAC global attribute table: the fixed descriptive
/// entries plus the handful of values derived from the source file.
fn global_attribute_table(inputs: GlobalAttrInputs) -> IndexMap<&'static str, AttributeValue> {
    let stamp = inputs.generated_stamp.format(utils::ISO_TIMESTAMP_FMT).to_string();
    let mut attrs: IndexMap<&'static str, AttributeValue> = IndexMap::new();

    attrs.insert("source", inputs.source_name.into());
    attrs.insert("id", "PODAAC-CYGNU-L3SM1".into());
    attrs.insert("ShortName", "CYGNSS_L3_SOIL_MOISTURE_V1.0".into());
    attrs.insert("title", "CYGNSS Level 3 Soil Moisture from UCAR/CU".into());
    attrs.insert("summary", "The CYGNSS Level 3 Soil Moisture Product provides volumetric water content estimates for soils between 0-5 cm depth at a 6-hour discretization for most of the subtropics. The data were produced by CYGNSS investigators at the University Corporation for Atmospheric Research (UCAR) and the University Colorado at Boulder (CU), and derive from version 2.1 of the CYGNSS L1 SDR. The soil moisture algorithm uses collocated soil moisture retrievals from SMAP to calibrate CYGNSS observations from the same day. For a given location, a linear relationship between the SMAP soil moisture and CYGNSS reflectivity is determined and used to transform the CYGNSS observations into soil moisture. The data are archived in daily files in netCDF-4 format. Two soil moisture variables report the volumetric water content in units of cm3/cm3. The variable SM_subdaily includes up to four soil moisture estimates per day. Another variable SM_daily provides a daily average. The time series covers the period from March 2017 to August 2020.".into());
    attrs.insert("comment", "Dataset created by UCAR and CU Boulder".into());
    attrs.insert("program", "CYGNSS".into());
    attrs.insert("project", "CYGNSS".into());
    attrs.insert("institution", "COSMIC Data Analysis and Archive Center, Constellation Observing System for Meteorology, Ionosphere and Climate, University Corporation for Atmospheric Research (UCAR/COSMIC/CDAAC)".into());
    attrs.insert("references", "Chew, C.; Small, E. Description of the UCAR/CU Soil Moisture Product. Remote Sens. 2020, 12, 1558. https://doi.org/10.3390/rs12101558".into());
    attrs.insert("keywords_vocabulary", "NASA Global Change Master Directory (GCMD) Science Keywords".into());
    attrs.insert("keywords", "EARTH SCIENCE > LAND SURFACE > SOILS > SOIL MOISTURE/WATER CONTENT".into());
    attrs.insert("Conventions", "CF-1.6,ACDD-1.3".into());
    attrs.insert("license", "Freely Distributed".into());
    attrs.insert("version", inputs.version.into());
    attrs.insert(
        "history",
        format!("{}. Modified for PODAAC release {stamp}.", inputs.history).into(),
    );
    attrs.insert("cdm_data_type", "Grid".into());
    attrs.insert("creator_name", "Clara Chew, Eric Small".into());
    attrs.insert("creator_type", "person, person".into());
    attrs.insert("creator_url", "https://staff.ucar.edu/users/clarac, http://geode.colorado.edu/~small/".into());
    attrs.insert("creator_email", "claraac@ucar.edu, eric.small@colorado.edu".into());
    attrs.insert("creator_institution", "UCAR/COSMIC/CDAAC, UCO".into());
    attrs.insert("publisher_name", "PO.DAAC".into());
    attrs.insert("publisher_email", "podaac@podaac.jpl.nasa.gov".into());
    attrs.insert("publisher_type", "institution".into());
    attrs.insert("publisher_url", "https://podaac.jpl.nasa.gov".into());
    attrs.insert("publisher_institution", "NASA/JPL/PODAAC".into());
    attrs.insert("processing_level", "3".into());
    attrs.insert("geospatial_lat_min", inputs.lat_min.into());
    attrs.insert("geospatial_lat_max", inputs.lat_max.into());
    attrs.insert("geospatial_lat_units", "degrees_north".into());
    attrs.insert("geospatial_lon_min", inputs.lon_min.into());
    attrs.insert("geospatial_lon_max", inputs.lon_max.into());
    attrs.insert("geospatial_lon_units", "degrees_east".into());
    attrs.insert(
        "time_coverage_start",
        inputs.reference.format("%Y-%m-%dT00:00:00").to_string().into(),
    );
    attrs.insert(
        "time_coverage_end",
        inputs.reference.format("%Y-%m-%dT23:59:59").to_string().into(),
    );
    attrs.insert("time_coverage_duration", "P1D".into());
    attrs.insert(
        "date_created",
        inputs
            .date_created
            .format(utils::ISO_TIMESTAMP_FMT)
            .to_string()
            .into(),
    );
    attrs.insert("date_modified", stamp.clone().into());
    attrs.insert("date_issued", stamp.into());

    attrs
}

/// Read a full latitude/longitude grid as f64 for the bounding-box
/// reductions. The whole extent is used; these grids carry no
/// missing-data sentinels.
fn read_coordinate(
    source: &netcdf::File,
    varname: &str,
) -> error_stack::Result<ArrayD<f64>, AdapterError> {
    source
        .variable(varname)
        .ok_or_else(|| AdapterError::MissingVariable(varname.to_string()))?
        .get::<f64, _>(Extents::All)
        .change_context_lazy(|| AdapterError::context(format!("reading variable '{varname}'")))
}

fn array_bounds(arr: &ArrayD<f64>) -> (f64, f64) {
    arr.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(lo, hi), &v| (lo.min(v), hi.max(v)),
    )
}

fn global_string_attr(
    source: &netcdf::File,
    name: &'static str,
) -> error_stack::Result<String, AdapterError> {
    let value = source
        .attribute(name)
        .ok_or_else(|| AdapterError::MissingGlobalAttr(name))?
        .value()
        .change_context_lazy(|| {
            AdapterError::context(format!("reading global attribute '{name}'"))
        })?;
    if let AttributeValue::Str(s) = value {
        Ok(s)
    } else {
        Err(AdapterError::context(format!("global attribute '{name}' is not a string")).into())
    }
}

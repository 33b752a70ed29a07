pub(crate) static TIME_DIM_NAME: &'static str = "time";
pub(crate) static LAT_DIM_NAME: &'static str = "lat";
pub(crate) static LON_DIM_NAME: &'static str = "lon";
pub(crate) static TIMESLICE_DIM_NAME: &'static str = "timeslices";
pub(crate) static SOURCE_ROWS_DIM: &'static str = "rows";
pub(crate) static SOURCE_COLUMNS_DIM: &'static str = "columns";
pub(crate) static HISTORY_ATTR: &'static str = "History";
pub(crate) static VERSION_ATTR: &'static str = "Version";
pub(crate) static STATIC_FLAGS_BASENAME: &'static str = "ucar_cu_cygnss_sm_v1_static_flags.nc";
pub(crate) static FILL_VALUE: f64 = -9999.0;

use std::{path::PathBuf, sync::LazyLock};

pub static DEFAULT_SPARK_PATH: LazyLock<PathBuf> = LazyLock::new(|| {
    if let Some(custom) = std::env::var_os("SPARK_UPDATER_HOME") {
        return PathBuf::from(custom);
    }

    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir);

    path.push("Spark");
    path
});

/// Computes a path under the Spark data directory.
///
/// Returns a `&Path` referencing the data directory itself if no arguments are passed in, or a
/// `PathBuf` created by joining all of the arguments to the base directory if at least one
/// argument is passed in.
///
/// The base directory is `<platform data dir>/Spark` unless `SPARK_UPDATER_HOME` is set.
///
/// # Examples
///
/// ```
/// use spark_updater::spark_path;
///
/// let logs = spark_path!("logs");
/// assert!(logs.starts_with(spark_path!()));
/// assert!(logs.ends_with("logs"));
/// ```
#[macro_export]
macro_rules! spark_path {
    () => {
        $crate::paths::DEFAULT_SPARK_PATH.as_path()
    };

    ( $( $path:expr ),+ $(,)? ) => {
        [
            $crate::paths::DEFAULT_SPARK_PATH.as_path(),
            $( std::path::Path::new(&$path) ),+
        ].into_iter().collect::<std::path::PathBuf>()
    };
}

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use synthmri::{HeaderField, MapFormat, Session, SessionError};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExportFormat {
    Dicom,
    Nifti,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Synthesize contrast-weighted MRI images from quantitative maps"
)]
struct Args {
    /// Configuration file with presets and synthetic image definitions
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Quantitative map to load, e.g. T1=maps/T1.nii
    #[arg(short, long = "map", value_parser = parse_key_value::<PathBuf>)]
    maps: Vec<(String, PathBuf)>,

    /// Container format of the maps
    #[arg(short, long, default_value = "nifti")]
    format: MapFormat,

    /// Synthetic image to produce, e.g. "FLAIR - 3T"
    #[arg(short, long)]
    image: String,

    /// Scanner parameter override, e.g. TE=90
    #[arg(short, long = "set", value_parser = parse_key_value::<f64>)]
    parameters: Vec<(String, f64)>,

    /// Header override, e.g. PatientID=SUBJ01
    #[arg(long = "header", value_parser = parse_key_value::<String>)]
    headers: Vec<(String, String)>,

    /// Series number written to exported DICOM headers
    #[arg(long)]
    series_number: Option<u32>,

    /// Output directory (DICOM) or file (NIfTI)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Export format
    #[arg(short, long, value_enum, default_value_t = ExportFormat::Dicom)]
    export: ExportFormat,

    /// Write a 16-bit PNG of the current slice
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Slice index shown in the preview
    #[arg(long, allow_hyphen_values = true)]
    slice: Option<isize>,
}

fn parse_key_value<T>(text: &str) -> Result<(String, T), String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{text}`"))?;
    let value = value.parse().map_err(|err| format!("invalid value for {key}: {err}"))?;
    Ok((key.trim().to_string(), value))
}

fn run(args: Args) -> Result<(), SessionError> {
    let mut session = Session::open(&args.config)?;
    for rejected in session.catalog().rejected() {
        log::warn!("{rejected}");
    }

    for (name, path) in &args.maps {
        session.load_map(name, path, args.format)?;
    }
    session.select_type(&args.image)?;
    for (name, value) in &args.parameters {
        let stored = session.set_parameter(name, *value)?;
        log::info!("{name} = {stored}");
    }
    for (field, value) in &args.headers {
        match field.parse::<HeaderField>() {
            Ok(field) => session.set_header(field, value.as_str()),
            Err(err) => log::warn!("{err}"),
        }
    }
    if let Some(series_number) = args.series_number {
        session.set_series_number(series_number);
    }
    if let Some(slice) = args.slice {
        session.set_slice(slice)?;
    }

    if let Some(path) = &args.preview {
        if let Err(err) = session.preview()?.save(path) {
            log::error!("Could not save preview {}: {err}", path.display());
        }
    }

    if let Some(output) = &args.output {
        match args.export {
            ExportFormat::Dicom => {
                let files = session.export_dicom(output)?;
                println!("Wrote {} slices to {}", files.len(), output.display());
            }
            ExportFormat::Nifti => {
                session.export_nifti(output)?;
                println!("Wrote {}", output.display());
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .try_init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

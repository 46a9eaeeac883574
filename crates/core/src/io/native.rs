//! Native GeoTIFF reading/writing
//!
//! Uses the `tiff` crate. Besides the pixel grid this handles the tags the
//! engine relies on: model scale/tiepoint, the EPSG code in the GeoKey
//! directory, GDAL_NODATA and GDAL_METADATA.

use crate::crs::{ModelType, CRS};
use crate::error::{Error, Result};
use crate::raster::{DataType, GeoTransform, Raster, RasterElement};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{ColorType, Gray16, Gray32Float, Gray64Float, Gray8};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tiff::TiffError;

/// GDAL_METADATA has no named variant in `tiff::tags::Tag`
const GDAL_METADATA: Tag = Tag::Unknown(42112);

const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;

/// Free-text metadata items stored in GDAL_METADATA.
///
/// `DESCRIPTION` and `AUTHOR` are additionally mirrored to the baseline
/// ImageDescription and Artist tags.
pub type Metadata = BTreeMap<String, String>;

pub const META_DESCRIPTION: &str = "DESCRIPTION";
pub const META_AUTHOR: &str = "AUTHOR";

/// Options for writing GeoTIFF files
#[derive(Debug, Clone, Default)]
pub struct GeoTiffOptions {
    /// Metadata items written with the image
    pub metadata: Metadata,
}

impl GeoTiffOptions {
    pub fn with_item(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Georeferencing and metadata read from a GeoTIFF header
#[derive(Debug, Clone, Default)]
pub(crate) struct GeoHeader {
    pub transform: Option<GeoTransform>,
    pub crs: Option<CRS>,
    pub nodata: Option<f64>,
    pub metadata: Metadata,
}

pub(crate) fn tiff_error(path: &Path, e: TiffError) -> Error {
    match e {
        TiffError::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => {
            Error::SourceNotFound {
                path: path.to_path_buf(),
            }
        }
        TiffError::IoError(io) => Error::Io(io),
        TiffError::LimitsExceeded => Error::OutOfMemory { bytes: 0 },
        TiffError::UnsupportedError(u) => Error::FormatNotSupported {
            path: path.to_path_buf(),
            reason: u.to_string(),
        },
        TiffError::FormatError(f) => Error::FormatNotSupported {
            path: path.to_path_buf(),
            reason: f.to_string(),
        },
        other => Error::Other(format!("{}: {}", path.display(), other)),
    }
}

/// Open a file for reading, telling a missing file apart from other I/O failures
pub(crate) fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::SourceNotFound {
            path: path.to_path_buf(),
        },
        _ => Error::Io(e),
    })
}

/// Open a TIFF decoder positioned on the first image
pub(crate) fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = open_file(path)?;
    Decoder::new(BufReader::new(file)).map_err(|e| match e {
        TiffError::IoError(io) if io.kind() != std::io::ErrorKind::UnexpectedEof => Error::Io(io),
        other => Error::FormatNotSupported {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    })
}

/// Convert any decoded sample buffer to f64
pub(crate) fn decoded_to_f64(result: DecodingResult) -> Result<Vec<f64>> {
    let data = match result {
        DecodingResult::U8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U64(buf) => buf.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I64(buf) => buf.into_iter().map(|v| v as f64).collect(),
        DecodingResult::F32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::F64(buf) => buf,
        #[allow(unreachable_patterns)]
        _ => {
            return Err(Error::UnsupportedDataType(
                "Unsupported TIFF pixel format".to_string(),
            ))
        }
    };
    Ok(data)
}

/// Read a GeoTIFF file into a Raster
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let mut decoder = open_decoder(path)?;
    decode_geotiff(&mut decoder, path)
}

/// Read only the metadata items of a GeoTIFF
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<Metadata> {
    let path = path.as_ref();
    let mut decoder = open_decoder(path)?;
    Ok(read_header(&mut decoder).metadata)
}

fn decode_geotiff<T, R>(decoder: &mut Decoder<R>, path: &Path) -> Result<Raster<T>>
where
    T: RasterElement,
    R: Read + Seek,
{
    let (width, height) = decoder.dimensions().map_err(|e| tiff_error(path, e))?;
    let rows = height as usize;
    let cols = width as usize;

    let result = decoder.read_image().map_err(|e| tiff_error(path, e))?;
    let values = decoded_to_f64(result)?;

    if values.len() != rows * cols {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let header = read_header(decoder);
    let data: Vec<T> = values.into_iter().map(T::from_f64).collect();
    let mut raster = Raster::from_vec(data, rows, cols)?;

    if let Some(transform) = header.transform {
        raster.set_transform(transform);
    }
    raster.set_crs(header.crs);
    raster.set_nodata(header.nodata.map(T::from_f64));

    Ok(raster)
}

/// Read the georeferencing tags. Missing or malformed tags are left unset.
pub(crate) fn read_header<R: Read + Seek>(decoder: &mut Decoder<R>) -> GeoHeader {
    GeoHeader {
        transform: read_geotransform(decoder).ok(),
        crs: read_crs(decoder),
        nodata: decoder
            .get_tag_ascii_string(Tag::GdalNodata)
            .ok()
            .and_then(|s| parse_nodata(&s)),
        metadata: decoder
            .get_tag_ascii_string(GDAL_METADATA)
            .map(|xml| parse_gdal_metadata(&xml))
            .unwrap_or_default(),
    }
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(|_| Error::Other("No pixel scale tag".into()))?;

    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(|_| Error::Other("No tiepoint tag".into()))?;

    if scale.len() >= 2 && tiepoint.len() >= 6 {
        // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
        let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
        let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
        return Ok(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]));
    }

    Err(Error::Other("Cannot determine geotransform".into()))
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<CRS> {
    let keys = decoder
        .get_tag_u16_vec(Tag::GeoKeyDirectoryTag)
        .ok()?;
    if keys.len() < 4 {
        return None;
    }
    // Header is [version, revision, minor, count], then 4-tuples of
    // [key id, location, count, value]. Only inline SHORT values are read.
    keys[4..]
        .chunks_exact(4)
        .filter(|entry| entry[1] == 0)
        .find_map(|entry| match entry[0] {
            KEY_PROJECTED_CS_TYPE => {
                Some(CRS::with_model(u32::from(entry[3]), ModelType::Projected))
            }
            KEY_GEOGRAPHIC_TYPE => {
                Some(CRS::with_model(u32::from(entry[3]), ModelType::Geographic))
            }
            _ => None,
        })
}

fn parse_nodata(s: &str) -> Option<f64> {
    let s = s.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if s.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    s.parse().ok()
}

fn format_nodata(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else {
        format!("{}", v)
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape_xml(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}

/// The tiff encoder only accepts ASCII strings
fn ascii_safe(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii() && c != '\0' { c } else { '?' })
        .collect()
}

fn gdal_metadata_xml(metadata: &Metadata) -> String {
    let mut xml = String::from("<GDALMetadata>\n");
    for (key, value) in metadata {
        xml.push_str(&format!(
            "  <Item name=\"{}\">{}</Item>\n",
            escape_xml(key),
            escape_xml(value)
        ));
    }
    xml.push_str("</GDALMetadata>");
    ascii_safe(&xml)
}

/// Parse the `<Item name="...">value</Item>` entries of a GDAL_METADATA tag
fn parse_gdal_metadata(xml: &str) -> Metadata {
    let mut items = Metadata::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Item name=\"") {
        rest = &rest[start + "<Item name=\"".len()..];
        let Some(name_end) = rest.find('"') else { break };
        let name = &rest[..name_end];
        rest = &rest[name_end..];
        let Some(open_end) = rest.find('>') else { break };
        rest = &rest[open_end + 1..];
        let Some(close) = rest.find("</Item>") else { break };
        items.insert(unescape_xml(name), unescape_xml(&rest[..close]));
        rest = &rest[close + "</Item>".len()..];
    }
    items
}

/// Write a Raster to a GeoTIFF file, using the cell type's data type
pub fn write_geotiff<T, P>(
    raster: &Raster<T>,
    path: P,
    options: Option<GeoTiffOptions>,
) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    encode_geotiff(raster, &mut writer, &options.unwrap_or_default())?;
    writer.flush()?;
    Ok(())
}

/// Write an f64 raster converting its cells to `data_type`.
///
/// Integer types saturate; no-data cells take the converted no-data value.
pub fn write_geotiff_as<P: AsRef<Path>>(
    raster: &Raster<f64>,
    path: P,
    data_type: DataType,
    options: Option<GeoTiffOptions>,
) -> Result<()> {
    match data_type {
        DataType::Byte => write_geotiff(&raster.map_to::<u8>(), path, options),
        DataType::UInt16 => write_geotiff(&raster.map_to::<u16>(), path, options),
        DataType::Float32 => write_geotiff(&raster.map_to::<f32>(), path, options),
        DataType::Float64 => write_geotiff(raster, path, options),
    }
}

fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W, options: &GeoTiffOptions) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let mut encoder = TiffEncoder::new(writer)
        .map_err(|e| Error::Other(format!("TIFF encoder error: {}", e)))?;

    let tags = HeaderTags::new(raster, options);
    let (rows, cols) = raster.shape();

    match T::DATA_TYPE {
        DataType::Byte => {
            let data = cells::<T, u8>(raster, 0);
            write_band::<Gray8, W>(&mut encoder, cols, rows, &data, &tags)
        }
        DataType::UInt16 => {
            let data = cells::<T, u16>(raster, 0);
            write_band::<Gray16, W>(&mut encoder, cols, rows, &data, &tags)
        }
        DataType::Float32 => {
            let data = cells::<T, f32>(raster, f32::NAN);
            write_band::<Gray32Float, W>(&mut encoder, cols, rows, &data, &tags)
        }
        DataType::Float64 => {
            let data = cells::<T, f64>(raster, f64::NAN);
            write_band::<Gray64Float, W>(&mut encoder, cols, rows, &data, &tags)
        }
    }
}

fn cells<T: RasterElement, U: num_traits::NumCast + Copy>(raster: &Raster<T>, fallback: U) -> Vec<U> {
    raster
        .data()
        .iter()
        .map(|&v| num_traits::cast(v).unwrap_or(fallback))
        .collect()
}

/// Tag values prepared once per image
struct HeaderTags {
    scale: [f64; 3],
    tiepoint: [f64; 6],
    geokeys: Vec<u16>,
    nodata: Option<String>,
    description: Option<String>,
    author: Option<String>,
    metadata_xml: Option<String>,
}

impl HeaderTags {
    fn new<T: RasterElement>(raster: &Raster<T>, options: &GeoTiffOptions) -> Self {
        let gt = raster.transform();

        let model = raster.crs().map(|c| c.model()).unwrap_or(ModelType::Projected);
        let mut keys: Vec<[u16; 4]> = vec![
            [
                KEY_MODEL_TYPE,
                0,
                1,
                if model == ModelType::Geographic { 2 } else { 1 },
            ],
            [KEY_RASTER_TYPE, 0, 1, 1], // RasterPixelIsArea
        ];
        if let Some(code) = raster.crs().and_then(|c| u16::try_from(c.epsg()).ok()) {
            let key = match model {
                ModelType::Projected => KEY_PROJECTED_CS_TYPE,
                ModelType::Geographic => KEY_GEOGRAPHIC_TYPE,
            };
            keys.push([key, 0, 1, code]);
        }
        let mut geokeys = vec![1, 1, 0, keys.len() as u16];
        geokeys.extend(keys.iter().flatten());

        let metadata = &options.metadata;
        Self {
            scale: [gt.pixel_width, gt.pixel_height.abs(), 0.0],
            tiepoint: [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0],
            geokeys,
            nodata: raster
                .nodata()
                .and_then(|nd| nd.to_f64())
                .map(format_nodata),
            description: metadata.get(META_DESCRIPTION).map(|s| ascii_safe(s)),
            author: metadata.get(META_AUTHOR).map(|s| ascii_safe(s)),
            metadata_xml: (!metadata.is_empty()).then(|| gdal_metadata_xml(metadata)),
        }
    }
}

fn write_band<C, W>(
    encoder: &mut TiffEncoder<W>,
    cols: usize,
    rows: usize,
    data: &[C::Inner],
    tags: &HeaderTags,
) -> Result<()>
where
    C: ColorType,
    [C::Inner]: TiffValue,
    W: Write + Seek,
{
    let tag_err = |name: &str, e: TiffError| Error::Other(format!("Cannot write {} tag: {}", name, e));

    let mut image = encoder
        .new_image::<C>(cols as u32, rows as u32)
        .map_err(|e| Error::Other(format!("Cannot create TIFF image: {}", e)))?;

    let dir = image.encoder();
    dir.write_tag(Tag::ModelPixelScaleTag, &tags.scale[..])
        .map_err(|e| tag_err("scale", e))?;
    dir.write_tag(Tag::ModelTiepointTag, &tags.tiepoint[..])
        .map_err(|e| tag_err("tiepoint", e))?;
    dir.write_tag(Tag::GeoKeyDirectoryTag, tags.geokeys.as_slice())
        .map_err(|e| tag_err("geokey", e))?;
    if let Some(nodata) = &tags.nodata {
        dir.write_tag(Tag::GdalNodata, nodata.as_str())
            .map_err(|e| tag_err("nodata", e))?;
    }
    if let Some(description) = &tags.description {
        dir.write_tag(Tag::ImageDescription, description.as_str())
            .map_err(|e| tag_err("description", e))?;
    }
    if let Some(author) = &tags.author {
        dir.write_tag(Tag::Artist, author.as_str())
            .map_err(|e| tag_err("artist", e))?;
    }
    if let Some(xml) = &tags.metadata_xml {
        dir.write_tag(GDAL_METADATA, xml.as_str())
            .map_err(|e| tag_err("metadata", e))?;
    }

    image
        .write_data(data)
        .map_err(|e| Error::Other(format!("Cannot write image data: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Raster;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn sample() -> Raster<f64> {
        let mut raster =
            Raster::from_vec((0..12).map(|v| v as f64).collect(), 3, 4).unwrap();
        raster.set_transform(GeoTransform::new(500.0, 900.0, 10.0, -10.0));
        raster.set_crs(Some(CRS::from_epsg(32719)));
        raster.set_nodata(Some(-9999.0));
        raster
    }

    #[test]
    fn test_write_read_roundtrip_keeps_georeferencing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.tif");
        let options = GeoTiffOptions::default()
            .with_item(META_DESCRIPTION, "elevation minmax")
            .with_item(META_AUTHOR, "suitability");

        write_geotiff(&sample(), &path, Some(options)).unwrap();
        let loaded: Raster<f64> = read_geotiff(&path).unwrap();

        assert_eq!(loaded.shape(), (3, 4));
        assert_relative_eq!(loaded.get(2, 3).unwrap(), 11.0);
        assert_relative_eq!(loaded.transform().origin_x, 500.0);
        assert_relative_eq!(loaded.transform().pixel_height, -10.0);
        assert_eq!(loaded.crs().map(|c| c.epsg()), Some(32719));
        assert_eq!(loaded.nodata(), Some(-9999.0));

        let meta = read_metadata(&path).unwrap();
        assert_eq!(meta.get(META_DESCRIPTION).map(String::as_str), Some("elevation minmax"));
        assert_eq!(meta.get(META_AUTHOR).map(String::as_str), Some("suitability"));
    }

    #[test]
    fn test_roundtrip_without_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.tif");
        let mut raster = sample();
        raster.set_nodata(Some(-1.0));

        write_geotiff(&raster, &path, None).unwrap();
        let loaded: Raster<f64> = read_geotiff(&path).unwrap();

        assert_eq!(loaded.nodata(), Some(-1.0));
        assert_relative_eq!(loaded.transform().origin_x, 500.0);
        assert_relative_eq!(loaded.transform().origin_y, 900.0);
        assert_relative_eq!(loaded.transform().pixel_width, 10.0);
        assert_eq!(loaded.crs().map(|c| c.epsg()), Some(32719));
        assert!(read_metadata(&path).unwrap().is_empty());
    }

    #[test]
    fn test_integer_nodata_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("byte_nodata.tif");
        let mut raster = Raster::from_vec(vec![0.0, 1.0, f64::NAN, 1.0], 2, 2).unwrap();
        raster.set_nodata(Some(f64::NAN));

        write_geotiff_as(&raster, &path, DataType::Byte, None).unwrap();
        let loaded: Raster<u8> = read_geotiff(&path).unwrap();
        assert_eq!(loaded.nodata(), Some(255));
        assert_eq!(loaded.data().iter().copied().collect::<Vec<_>>(), vec![0, 1, 255, 1]);

        let path = dir.path().join("u16_nodata.tif");
        let mut raster: Raster<u16> = Raster::from_vec(vec![7, 0, 9, 0], 2, 2).unwrap();
        raster.set_nodata(Some(9));
        write_geotiff(&raster, &path, None).unwrap();
        let loaded: Raster<f64> = read_geotiff(&path).unwrap();
        assert_eq!(loaded.nodata(), Some(9.0));
        assert_relative_eq!(loaded.get(0, 1).unwrap(), 0.0);
    }

    #[test]
    fn test_byte_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("byte.tif");
        let raster: Raster<u8> = sample().map_to();

        write_geotiff(&raster, &path, None).unwrap();
        let loaded: Raster<f64> = read_geotiff(&path).unwrap();
        assert_relative_eq!(loaded.get(1, 1).unwrap(), 5.0);
        // -9999 doesn't fit in a byte
        assert_eq!(loaded.nodata(), Some(255.0));
    }

    #[test]
    fn test_missing_file_is_source_not_found() {
        let err = read_geotiff::<f64, _>("/definitely/not/here.tif").unwrap_err();
        assert!(matches!(err, Error::SourceNotFound { .. }));
    }

    #[test]
    fn test_garbage_file_is_format_not_supported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.tif");
        std::fs::write(&path, b"this is not a tiff at all").unwrap();

        let err = read_geotiff::<f64, _>(&path).unwrap_err();
        assert!(matches!(err, Error::FormatNotSupported { .. }), "{err}");
    }

    #[test]
    fn test_write_as_uint16_saturates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("u16.tif");
        let mut raster = Raster::from_vec(vec![-5.0, 70000.0, 12.6, 3.0], 2, 2).unwrap();
        raster.set_nodata(Some(3.0));

        write_geotiff_as(&raster, &path, DataType::UInt16, None).unwrap();
        let loaded: Raster<f64> = read_geotiff(&path).unwrap();
        assert_relative_eq!(loaded.get(0, 0).unwrap(), 0.0);
        assert_relative_eq!(loaded.get(0, 1).unwrap(), 65535.0);
        assert_relative_eq!(loaded.get(1, 0).unwrap(), 12.0);
        assert_eq!(loaded.nodata(), Some(3.0));
    }

    #[test]
    fn test_metadata_xml_escaping() {
        let mut meta = Metadata::new();
        meta.insert("DESCRIPTION".into(), "0.4 x a<b & c".into());
        let parsed = parse_gdal_metadata(&gdal_metadata_xml(&meta));
        assert_eq!(parsed, meta);
    }
}

use c3dio::layout::{block_offset, blocks_for, BLOCK_SIZE};
use c3dio::{
    AnalogBlock, AnalogMode, C3dError, ConversionMode, ErrorKind, Frame, Header, Point, ReadOptions,
    ReadStatus, Reader, Writer, WriterOptions,
};
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom};
use tempfile::NamedTempFile;

const POINTS: usize = 24;
const CHANNELS: usize = 3;

fn marker(frame: usize, point: usize) -> Point {
    Point::new(frame as f32 * 0.5, point as f32 * 10.0, -(point as f32) - 0.25).with_residual(1.0, 0b101)
}

fn motion_frame(i: usize, sub_samples: usize) -> Frame {
    let points = (0..POINTS).map(|p| marker(i, p)).collect();
    let analog = (0..sub_samples * CHANNELS).map(|k| (i * 100 + k) as f32).collect();
    Frame::new(points, AnalogBlock::new(sub_samples, CHANNELS, analog).unwrap())
}

fn write_to(path: &std::path::Path, writer: &mut Writer) {
    let mut file = File::create(path).unwrap();
    writer.write(&mut file).unwrap();
}

#[test]
fn test_end_to_end_100_frames() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let mut writer = Writer::new(WriterOptions {
            point_rate: 200.0,
            analog_rate: 400.0,
            point_scale: -1.0,
        })
        .unwrap();
        writer.set_point_labels(&(0..POINTS).map(|p| format!("M{p:02}")).collect::<Vec<_>>()).unwrap();
        writer.set_analog_labels(&["FX", "FY", "FZ"]).unwrap();
        writer.add_frames((0..100).map(|i| motion_frame(i, 2)), None).unwrap();
        write_to(&path, &mut writer);
    }

    {
        let mut reader = Reader::open_path(&path).unwrap();
        assert_eq!(reader.frame_count(), 100);
        assert_eq!(reader.point_count(), 24);
        assert_eq!(reader.analog_channels(), 3);
        assert_eq!(reader.manager().point_rate(), 200.0);
        assert_eq!(reader.manager().analog_per_frame(), 2);
        assert_eq!(reader.point_labels()[23], "M23");
        assert_eq!(reader.analog_labels(), vec!["FX", "FY", "FZ"]);

        let (frames, status) = reader.read_all(ReadOptions::default()).unwrap();
        assert_eq!(status, ReadStatus::Complete { frames: 100 });
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(*frame, motion_frame(i, 2));
        }
    }

    let len = std::fs::metadata(&path).unwrap().len();
    assert_eq!(len % BLOCK_SIZE as u64, 0);
}

#[test]
fn test_integer_scale_quantization() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();
    let scale = 0.1;

    {
        let mut writer = Writer::new(WriterOptions { point_rate: 100.0, point_scale: scale, ..Default::default() }).unwrap();
        writer.set_analog_scales(&[0.5, 0.5, 2.0]).unwrap();
        writer.set_analog_offsets(&[0, 10, -4]).unwrap();
        writer.add_frames((0..20).map(|i| motion_frame(i, 1)), None).unwrap();
        write_to(&path, &mut writer);
    }

    let mut reader = Reader::open_path(&path).unwrap();
    assert!(!reader.manager().point_encoding().is_float());
    for (n, frame) in reader.read_frames(ReadOptions::default()).unwrap() {
        let expected = motion_frame(n as usize - 1, 1);
        for (got, want) in frame.points.iter().zip(&expected.points) {
            assert!((got.x - want.x).abs() <= scale / 2.0 + 1e-4);
            assert!((got.y - want.y).abs() <= scale / 2.0 + 1e-4);
            assert!((got.z - want.z).abs() <= scale / 2.0 + 1e-4);
            assert_eq!(got.cameras, 0b101);
        }
        for (got, want) in frame.analog.data().iter().zip(expected.analog.data()) {
            assert!((got - want).abs() <= 1.0, "{got} vs {want}");
        }
    }
}

#[test]
fn test_short_file_terminates_cleanly() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let mut writer = Writer::new(WriterOptions::default()).unwrap();
    writer.add_frames((0..10).map(|i| motion_frame(i, 0)), None).unwrap();
    write_to(&path, &mut writer);

    // 24 float points per frame, no analog.
    let frame_size = (POINTS * 16) as u64;
    let data_start = block_offset(writer.header().data_block);
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(data_start + frame_size * 4 + 100)
        .unwrap();

    let mut reader = Reader::open_path(&path).unwrap();
    assert_eq!(reader.frame_count(), 10);
    let mut iter = reader.read_frames(ReadOptions::default()).unwrap();
    let numbers: Vec<u32> = iter.by_ref().map(|(n, _)| n).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert_eq!(iter.status(), ReadStatus::Truncated { expected: 10, read: 4 });
    assert!(!reader.last_status().unwrap().is_complete());
}

#[test]
fn test_duplicate_group_names_from_raw_bytes() {
    fn record(out: &mut Vec<u8>, name: &str, group_id: i8, body: &[u8]) {
        out.push(name.len() as u8);
        out.push(group_id as u8);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&((body.len() + 2) as i16).to_le_bytes());
        out.extend_from_slice(body);
    }

    let header = Header { parameter_block: 2, data_block: 3, ..Header::default() };
    let mut bytes = header.encode().to_vec();
    bytes.extend_from_slice(&[1, 0x50, 1, 84]);
    record(&mut bytes, "FORCE", -3, b"\x06plate1");
    record(&mut bytes, "ZERO", 3, &[2, 0, 0, 0, 0]);
    record(&mut bytes, "FORCE", -7, b"\x06plate2");
    record(&mut bytes, "ZERO", 7, &[2, 0, 5, 0, 0]);
    bytes.resize(2 * BLOCK_SIZE, 0);

    let reader = Reader::open(Cursor::new(bytes)).unwrap();
    let first = reader.dictionary().group("FORCE").unwrap();
    let second = reader.dictionary().group("FORCE7").unwrap();
    assert_eq!((first.id, first.desc.as_str()), (3, "plate1"));
    assert_eq!((second.id, second.desc.as_str()), (7, "plate2"));
    assert_eq!(reader.get("force:zero").and_then(|p| p.as_i16()), Some(0));
    assert_eq!(reader.get("FORCE7:ZERO").and_then(|p| p.as_i16()), Some(5));
}

#[test]
fn test_gap_fill_survives_write() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let mut writer = Writer::new(WriterOptions { point_rate: 100.0, analog_rate: 200.0, ..Default::default() }).unwrap();
    writer.add_frames([motion_frame(7, 2)], Some(10)).unwrap();
    assert_eq!(writer.frame_count(), 11);
    write_to(&path, &mut writer);

    let mut reader = Reader::open_path(&path).unwrap();
    let (frames, _) = reader.read_all(ReadOptions::default()).unwrap();
    assert_eq!(frames.len(), 11);
    for frame in &frames[..10] {
        assert!(frame.point_rows().iter().all(|row| *row == [0.0, 0.0, 0.0, -1.0, -1.0]));
        assert!(frame.analog.data().iter().all(|&v| v == 0.0));
    }
    assert_eq!(frames[10], motion_frame(7, 2));
}

#[test]
fn test_nan_and_sentinel_read_identically() {
    let mut writer = Writer::new(WriterOptions::default()).unwrap();
    let mut first = motion_frame(0, 0);
    first.points[1] = Point::invalid();
    writer.add_frames([first], None).unwrap();
    let mut out = Cursor::new(Vec::new());
    writer.write(&mut out).unwrap();

    // Overwrite x of point 0 with NaN; point 1 already holds the sentinel.
    let mut bytes = out.into_inner();
    let at = block_offset(writer.header().data_block) as usize;
    bytes[at..at + 4].copy_from_slice(&f32::NAN.to_le_bytes());

    let mut reader = Reader::open(Cursor::new(bytes)).unwrap();
    let (frames, _) = reader.read_all(ReadOptions::default()).unwrap();
    let points = &frames[0].points;
    assert!(!points[0].is_valid());
    assert!(!points[1].is_valid());
    assert_eq!(points[0], points[1]);
    assert_eq!(points[0].to_row(), points[1].to_row());
    assert!(points[2].is_valid());
}

#[test]
fn test_copy_roundtrip_preserves_raw_words() {
    let src = NamedTempFile::new().unwrap();
    let dst = NamedTempFile::new().unwrap();

    {
        let mut writer = Writer::new(WriterOptions { point_rate: 50.0, analog_rate: 100.0, point_scale: 0.2 }).unwrap();
        writer.set_analog_scales(&[0.25, 0.25, 0.25]).unwrap();
        writer.set_analog_general_scale(2.0).unwrap();
        writer.set_start_frame(30).unwrap();
        writer.set_events(&[(0.4, "HEEL")]);
        writer.add_frames((0..12).map(|i| motion_frame(i, 2)), None).unwrap();
        write_to(src.path(), &mut writer);
    }

    {
        let mut reader = Reader::open_path(src.path()).unwrap();
        let mut writer = reader.to_writer(ConversionMode::Copy).unwrap();
        assert_eq!(writer.analog_mode(), AnalogMode::Raw);
        assert_eq!(writer.frame_count(), 12);
        writer.dictionary_mut().get_create("POINT").unwrap().set_str("UNITS", "", "m").unwrap();
        write_to(dst.path(), &mut writer);
    }

    let mut a = Reader::open_path(src.path()).unwrap();
    let mut b = Reader::open_path(dst.path()).unwrap();
    assert_eq!(b.first_frame(), 30);
    assert_eq!(b.last_frame(), 41);
    assert_eq!(b.manager().point_units().as_deref(), Some("m"));
    assert_eq!(b.header().events().collect::<Vec<_>>(), vec![(0.4, "HEEL")]);
    assert_eq!(a.read_all(ReadOptions::raw()).unwrap(), b.read_all(ReadOptions::raw()).unwrap());
}

#[test]
fn test_shallow_copy_keeps_transform() {
    let mut writer = Writer::new(WriterOptions { point_rate: 50.0, analog_rate: 50.0, ..Default::default() }).unwrap();
    writer.set_point_labels(&(0..POINTS).map(|p| format!("P{p}")).collect::<Vec<_>>()).unwrap();
    writer.set_analog_offsets(&[1, 2, 3]).unwrap();
    writer.add_frames((0..3).map(|i| motion_frame(i, 1)), None).unwrap();
    let mut buf = Cursor::new(Vec::new());
    writer.write(&mut buf).unwrap();

    let mut reader = Reader::open(Cursor::new(buf.into_inner())).unwrap();
    let mut shallow = reader.to_writer(ConversionMode::Shallow).unwrap();
    assert_eq!(shallow.frame_count(), 3);
    assert!(shallow.dictionary().get("POINT:UNITS").is_none());
    assert_eq!(shallow.manager().point_labels().len(), POINTS);
    assert_eq!(shallow.dictionary().get("ANALOG:OFFSET").unwrap().i16_array(), vec![1, 2, 3]);

    let mut out = Cursor::new(Vec::new());
    shallow.write(&mut out).unwrap();
    let mut copy = Reader::open(Cursor::new(out.into_inner())).unwrap();
    let (frames, _) = copy.read_all(ReadOptions::default()).unwrap();
    assert_eq!(frames[2], motion_frame(2, 1));

    let mut header_only = reader.to_writer(ConversionMode::CopyHeader).unwrap();
    assert_eq!(header_only.frame_count(), 0);
    assert!(matches!(header_only.write(&mut Cursor::new(Vec::new())), Err(C3dError::EmptyWriter)));
}

#[test]
fn test_foreign_processor_rejected() {
    let mut writer = Writer::new(WriterOptions::default()).unwrap();
    writer.add_frames([motion_frame(0, 0)], None).unwrap();
    let mut out = Cursor::new(Vec::new());
    writer.write(&mut out).unwrap();
    let mut bytes = out.into_inner();

    let processor = block_offset(u16::from(writer.header().parameter_block)) as usize + 3;
    bytes[processor] = 85;
    let err = Reader::open(Cursor::new(bytes.clone())).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Format);

    bytes[processor] = 84;
    bytes[1] = 0x51;
    let err = Reader::open(Cursor::new(bytes)).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_parameter_blocks_sized_from_dictionary() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let mut writer = Writer::new(WriterOptions::default()).unwrap();
    let labels: Vec<String> = (0..200).map(|i| format!("LONG_MARKER_LABEL_{i:03}")).collect();
    writer.add_frames([Frame::new(vec![Point::new(1.0, 2.0, 3.0); 200], AnalogBlock::default())], None).unwrap();
    writer.set_point_labels(&labels).unwrap();
    write_to(&path, &mut writer);

    let mut file = File::open(&path).unwrap();
    let mut raw = [0u8; 512];
    file.read_exact(&mut raw).unwrap();
    let header = Header::decode(&raw).unwrap();
    let blocks = blocks_for(writer.dictionary().byte_len());
    assert!(blocks > 1);
    assert_eq!(usize::from(header.data_block), usize::from(header.parameter_block) + blocks);

    file.seek(SeekFrom::Start(block_offset(u16::from(header.parameter_block)) + 2)).unwrap();
    let mut count = [0u8; 1];
    file.read_exact(&mut count).unwrap();
    assert_eq!(usize::from(count[0]), blocks);

    let reader = Reader::open_path(&path).unwrap();
    assert_eq!(reader.point_labels(), labels);
}

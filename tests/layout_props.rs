use std::collections::BTreeMap;
use std::io::Cursor;

use c3dio::layout::{blocks_for, BLOCK_SIZE};
use c3dio::{AnalogBlock, Dictionary, Frame, ParamValue, Point, ReadOptions, Reader, Writer, WriterOptions};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Payload {
    Ints(Vec<i16>),
    Floats(Vec<f32>),
    Labels(Vec<String>),
}

impl Payload {
    fn value(&self) -> ParamValue {
        match self {
            Payload::Ints(v)   => ParamValue::i16_array(v.clone()),
            Payload::Floats(v) => ParamValue::f32_array(v.clone()),
            Payload::Labels(v) => ParamValue::text_array(v),
        }
    }
}

fn payload() -> impl Strategy<Value = Payload> {
    prop_oneof![
        prop::collection::vec(any::<i16>(), 0..60).prop_map(Payload::Ints),
        prop::collection::vec(-1.0e6f32..1.0e6, 0..60).prop_map(Payload::Floats),
        prop::collection::vec("[A-Z][A-Z0-9]{0,7}", 1..30).prop_map(Payload::Labels),
    ]
}

fn groups() -> impl Strategy<Value = BTreeMap<String, BTreeMap<String, Payload>>> {
    prop::collection::btree_map(
        "[A-Z][A-Z_]{0,10}",
        prop::collection::btree_map("[A-Z][A-Z0-9_]{0,12}", payload(), 0..8),
        1..10,
    )
}

fn build(tree: &BTreeMap<String, BTreeMap<String, Payload>>) -> Dictionary {
    let mut dict = Dictionary::default();
    for (group_name, params) in tree {
        let group = dict.get_create(group_name).unwrap();
        for (name, payload) in params {
            group.set(name, "generated", payload.value()).unwrap();
        }
    }
    dict
}

proptest! {
    #[test]
    fn dictionary_roundtrip_and_block_count(tree in groups()) {
        let dict = build(&tree);
        let (bytes, blocks) = dict.encode().unwrap();

        prop_assert_eq!(bytes.len(), blocks * BLOCK_SIZE);
        prop_assert_eq!(blocks, blocks_for(dict.byte_len()));
        prop_assert_eq!(usize::from(bytes[2]), blocks);
        prop_assert_eq!(Dictionary::decode(&bytes).unwrap(), dict);
    }

    #[test]
    fn data_section_follows_parameters(
        points in 1usize..120,
        frames in 1usize..6,
        labels in prop::collection::vec("[A-Z]{1,16}", 0..120),
    ) {
        let mut writer = Writer::new(WriterOptions::default()).unwrap();
        writer.set_point_labels(&labels).unwrap();
        let frame = Frame::new(vec![Point::new(1.0, -2.0, 3.5); points], AnalogBlock::default());
        writer.add_frames(vec![frame; frames], None).unwrap();

        let mut out = Cursor::new(Vec::new());
        writer.write(&mut out).unwrap();
        let bytes = out.into_inner();
        let header = writer.header();

        prop_assert_eq!(bytes.len() % BLOCK_SIZE, 0);
        prop_assert_eq!(
            usize::from(header.data_block),
            usize::from(header.parameter_block) + blocks_for(writer.dictionary().byte_len())
        );

        let mut reader = Reader::open(Cursor::new(bytes)).unwrap();
        prop_assert_eq!(reader.frame_count(), frames);
        let (read, status) = reader.read_all(ReadOptions::default()).unwrap();
        prop_assert!(status.is_complete());
        prop_assert_eq!(read.len(), frames);
        prop_assert!(read.iter().all(|f| f.points.len() == points));
    }
}

use std::io::{self, Write};

use crate::context::ContextStack;
use crate::handle::HandleCodec;
use crate::scene::{SceneGraph, SceneObject};

/// Marker terminating one complete state dump on the wire. The monitor side
/// scans for it to frame blocks.
pub const END_OF_BLOCK: &str = "#ENDBLOCK";

/// Serialize the whole engine state as a rhai expression yielding a map,
/// terminated by the end-of-block marker. Consumed by the crash path and by
/// the external sampling protocol; a debugger script evaluates the block and
/// receives the resulting map through `sample(...)`.
pub fn write_state<W: Write>(
    dst: &mut W,
    scene: &SceneGraph,
    stack: &ContextStack,
    codec: &HandleCodec,
    ticks: u64,
) -> io::Result<()> {
    let usage = stack.usage();
    writeln!(dst, "let state = #{{")?;
    writeln!(
        dst,
        "  display: #{{ ticks: {ticks}, context_depth: {}, context_limit: {} }},",
        usage.active, usage.limit
    )?;
    writeln!(dst, "  contexts: [],")?;
    writeln!(dst, "}};")?;

    // stacked frames first (oldest at index 0), live context last
    for (index, frame) in stack.frames().iter().enumerate() {
        write_context(dst, index, frame.len(), frame.iter(), codec)?;
    }
    write_context(dst, stack.frames().len(), scene.live_count(), scene.iter(), codec)?;

    writeln!(dst, "state")?;
    writeln!(dst, "{END_OF_BLOCK}")?;
    dst.flush()
}

fn write_context<'a, W, I>(dst: &mut W, index: usize, alive: usize, objects: I, codec: &HandleCodec) -> io::Result<()>
where
    W: Write,
    I: Iterator<Item = (crate::handle::ObjectHandle, &'a SceneObject)>,
{
    writeln!(dst, "let ctx = #{{ ind: {index}, alive: {alive}, objects: #{{}} }};")?;
    for (handle, object) in objects {
        write_object(dst, handle, object, codec)?;
    }
    writeln!(dst, "state.contexts += ctx;")?;
    Ok(())
}

fn write_object<W: Write>(
    dst: &mut W,
    handle: crate::handle::ObjectHandle,
    object: &SceneObject,
    codec: &HandleCodec,
) -> io::Result<()> {
    writeln!(dst, "ctx.objects[\"{}\"] = #{{", handle.raw())?;
    writeln!(dst, "  kind: \"{}\",", object.kind.label())?;
    writeln!(dst, "  id_translated: {},", codec.encode(handle))?;
    writeln!(dst, "  parent: {},", object.parent.raw())?;
    writeln!(dst, "  position: [{:.4}, {:.4}],", object.position[0], object.position[1])?;
    writeln!(dst, "  scale: [{:.4}, {:.4}],", object.scale[0], object.scale[1])?;
    writeln!(dst, "  rotation: {:.4},", object.rotation)?;
    writeln!(dst, "  opacity: {:.4},", object.opacity)?;
    writeln!(dst, "  order: {},", object.order)?;
    if let Some(ticks) = object.lifetime {
        writeln!(dst, "  lifetime: {ticks},")?;
    }
    if let Some(tag) = &object.tracetag {
        writeln!(dst, "  tracetag: \"{}\",", tag.replace('"', "'"))?;
    }
    if let Some(fsrv) = &object.frameserver {
        writeln!(dst, "  feed: \"{}\",", fsrv.feed.label())?;
        writeln!(dst, "  feed_bound: {},", fsrv.callback.is_some())?;
    }
    writeln!(dst, "}};")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::ObjectKind;

    #[test]
    fn dump_ends_with_block_marker() {
        let mut scene = SceneGraph::new();
        let a = scene.alloc(ObjectKind::Video);
        scene.get_mut(a).expect("live").tracetag = Some("splash".to_string());
        let stack = ContextStack::default();
        let codec = HandleCodec::new();
        let mut out = Vec::new();
        write_state(&mut out, &scene, &stack, &codec, 42).expect("dump succeeds");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.ends_with("#ENDBLOCK\n"));
        assert!(text.contains("ticks: 42"));
        assert!(text.contains("tracetag: \"splash\""));
    }

    #[test]
    fn dump_is_a_valid_rhai_expression() {
        let mut scene = SceneGraph::new();
        scene.alloc(ObjectKind::Video);
        scene.alloc(ObjectKind::Audio);
        let stack = ContextStack::default();
        let codec = HandleCodec::new();
        let mut out = Vec::new();
        write_state(&mut out, &scene, &stack, &codec, 7).expect("dump succeeds");
        let text = String::from_utf8(out).expect("utf8");
        let block = text.strip_suffix("#ENDBLOCK\n").expect("marker present");
        let engine = rhai::Engine::new();
        let value = engine.eval::<rhai::Map>(block).expect("block evaluates to a map");
        assert!(value.contains_key("display"));
        assert!(value.contains_key("contexts"));
    }
}

//! TLV encoding and decoding of compiled models.
//!
//! Layout (all numbers are TLV type numbers):
//!
//! ```text
//! LvsModel := Version(0x61) StartId(0x25) NamedPatternCnt(0x69) Node* TagSymbol*
//! Node(0x63) := NodeId(0x25) [Parent(0x25)] RuleName(0x29)*
//!               ValueEdge(0x51)* PatternEdge(0x53)* SignRef(0x55)*
//! ValueEdge := Destination(0x25) Value(0x21: component wire form)
//! PatternEdge := Destination(0x25) Tag(0x23) Constraint(0x43)*
//! Constraint := ConstraintOption(0x41)+
//! ConstraintOption := Value(0x21) | Tag(0x23) | UserFnCall(0x31)
//! UserFnCall := FnId(0x27) UserFnArg(0x33)*
//! UserFnArg := Value(0x21) | Tag(0x23)
//! TagSymbol(0x67) := Tag(0x23) Identifier(0x29)
//! ```
//!
//! The parent back-reference shares the `NodeId` type: it is the second
//! bare node-id element of a `Node`. Unknown even (non-critical) TLV
//! types are skipped on decode; unknown odd types are rejected. Decoding
//! ends with a full [`LvsModel::validate`] pass.

use crate::model::{
    typenum, ConstraintOption, FnArg, LvsModel, ModelError, Node, NodeId, PatternConstraint,
    PatternEdge, PatternId, TagSymbol, UserFnCall, ValueEdge,
};
use crate::name::Component;
use crate::tlv::{self, Reader};

/// Encodes a model into its TLV form.
pub fn encode(model: &LvsModel) -> Vec<u8> {
    let mut out = Vec::new();
    tlv::write_uint_tlv(&mut out, typenum::VERSION, model.version as u64);
    tlv::write_uint_tlv(&mut out, typenum::NODE_ID, model.start.as_u64());
    tlv::write_uint_tlv(&mut out, typenum::NAMED_PATTERN_CNT, model.named_pattern_cnt);
    for node in &model.nodes {
        let payload = encode_node(node);
        tlv::write_tlv(&mut out, typenum::NODE, &payload);
    }
    for symbol in &model.symbols {
        let mut payload = Vec::new();
        tlv::write_uint_tlv(&mut payload, typenum::PATTERN_TAG, symbol.tag.as_u64());
        tlv::write_tlv(&mut payload, typenum::IDENTIFIER, symbol.ident.as_bytes());
        tlv::write_tlv(&mut out, typenum::TAG_SYMBOL, &payload);
    }
    out
}

fn encode_node(node: &Node) -> Vec<u8> {
    let mut out = Vec::new();
    tlv::write_uint_tlv(&mut out, typenum::NODE_ID, node.id.as_u64());
    if let Some(parent) = node.parent {
        tlv::write_uint_tlv(&mut out, typenum::NODE_ID, parent.as_u64());
    }
    for name in &node.rule_names {
        tlv::write_tlv(&mut out, typenum::IDENTIFIER, name.as_bytes());
    }
    for edge in &node.value_edges {
        let mut payload = Vec::new();
        tlv::write_uint_tlv(&mut payload, typenum::NODE_ID, edge.dest.as_u64());
        tlv::write_tlv(&mut payload, typenum::COMPONENT_VALUE, &edge.value.to_wire());
        tlv::write_tlv(&mut out, typenum::VALUE_EDGE, &payload);
    }
    for edge in &node.pattern_edges {
        let mut payload = Vec::new();
        tlv::write_uint_tlv(&mut payload, typenum::NODE_ID, edge.dest.as_u64());
        tlv::write_uint_tlv(&mut payload, typenum::PATTERN_TAG, edge.tag.as_u64());
        for term in &edge.cons {
            let mut term_payload = Vec::new();
            for option in &term.options {
                let opt_payload = encode_option(option);
                tlv::write_tlv(&mut term_payload, typenum::CONS_OPTION, &opt_payload);
            }
            tlv::write_tlv(&mut payload, typenum::CONSTRAINT, &term_payload);
        }
        tlv::write_tlv(&mut out, typenum::PATTERN_EDGE, &payload);
    }
    for &sign_ref in &node.sign_refs {
        tlv::write_uint_tlv(&mut out, typenum::KEY_NODE_ID, sign_ref.as_u64());
    }
    out
}

fn encode_option(option: &ConstraintOption) -> Vec<u8> {
    let mut out = Vec::new();
    match option {
        ConstraintOption::Value(value) => {
            tlv::write_tlv(&mut out, typenum::COMPONENT_VALUE, &value.to_wire());
        }
        ConstraintOption::Pat(tag) => {
            tlv::write_uint_tlv(&mut out, typenum::PATTERN_TAG, tag.as_u64());
        }
        ConstraintOption::Call(call) => {
            let mut payload = Vec::new();
            tlv::write_tlv(&mut payload, typenum::USER_FN_ID, call.fn_id.as_bytes());
            for arg in &call.args {
                let mut arg_payload = Vec::new();
                match arg {
                    FnArg::Value(value) => {
                        tlv::write_tlv(&mut arg_payload, typenum::COMPONENT_VALUE, &value.to_wire())
                    }
                    FnArg::Pat(tag) => {
                        tlv::write_uint_tlv(&mut arg_payload, typenum::PATTERN_TAG, tag.as_u64())
                    }
                }
                tlv::write_tlv(&mut payload, typenum::FN_ARG, &arg_payload);
            }
            tlv::write_tlv(&mut out, typenum::USER_FN_CALL, &payload);
        }
    }
    out
}

/// Decodes and validates a model.
pub fn decode(bytes: &[u8]) -> Result<LvsModel, ModelError> {
    let mut version: Option<u64> = None;
    let mut start: Option<u64> = None;
    let mut named_pattern_cnt: Option<u64> = None;
    let mut nodes: Vec<Node> = Vec::new();
    let mut symbols: Vec<TagSymbol> = Vec::new();

    let mut rd = Reader::new(bytes);
    while !rd.is_empty() {
        let (typ, payload) = rd.read_tlv().map_err(|_| ModelError::Truncated)?;
        match typ {
            typenum::VERSION => set_scalar(&mut version, typ, payload)?,
            typenum::NODE_ID => set_scalar(&mut start, typ, payload)?,
            typenum::NAMED_PATTERN_CNT => set_scalar(&mut named_pattern_cnt, typ, payload)?,
            typenum::NODE => nodes.push(decode_node(payload)?),
            typenum::TAG_SYMBOL => symbols.push(decode_symbol(payload)?),
            other => skip_unknown(other)?,
        }
    }

    let version = version.ok_or(ModelError::MissingField { what: "version" })?;
    let version =
        u32::try_from(version).map_err(|_| ModelError::MalformedField { typ: typenum::VERSION })?;
    let model = LvsModel {
        version,
        start: NodeId::new(start.ok_or(ModelError::MissingField { what: "start id" })?),
        named_pattern_cnt: named_pattern_cnt
            .ok_or(ModelError::MissingField { what: "named pattern count" })?,
        nodes,
        symbols,
    };
    model.validate()?;
    tracing::debug!(
        bytes = bytes.len(),
        nodes = model.nodes.len(),
        version = model.version,
        "decoded LVS model"
    );
    Ok(model)
}

fn set_scalar(slot: &mut Option<u64>, typ: u64, payload: &[u8]) -> Result<(), ModelError> {
    if slot.is_some() {
        return Err(ModelError::DuplicateField { typ });
    }
    *slot = Some(decode_uint(typ, payload)?);
    Ok(())
}

fn decode_uint(typ: u64, payload: &[u8]) -> Result<u64, ModelError> {
    tlv::parse_uint(payload).ok_or(ModelError::MalformedField { typ })
}

fn skip_unknown(typ: u64) -> Result<(), ModelError> {
    if tlv::is_critical(typ) {
        Err(ModelError::UnknownCriticalType { typ })
    } else {
        Ok(())
    }
}

fn decode_component(payload: &[u8]) -> Result<Component, ModelError> {
    Component::from_wire(payload)
        .map_err(|_| ModelError::MalformedField { typ: typenum::COMPONENT_VALUE })
}

fn decode_identifier(payload: &[u8]) -> Result<String, ModelError> {
    String::from_utf8(payload.to_vec())
        .map_err(|_| ModelError::MalformedField { typ: typenum::IDENTIFIER })
}

fn decode_node(payload: &[u8]) -> Result<Node, ModelError> {
    let mut id: Option<u64> = None;
    let mut parent: Option<u64> = None;
    let mut node_ids_seen = 0u32;
    let mut rule_names = Vec::new();
    let mut value_edges = Vec::new();
    let mut pattern_edges = Vec::new();
    let mut sign_refs = Vec::new();

    let mut rd = Reader::new(payload);
    while !rd.is_empty() {
        let (typ, payload) = rd.read_tlv().map_err(|_| ModelError::Truncated)?;
        match typ {
            typenum::NODE_ID => {
                // First occurrence is the node's id, the second its parent.
                node_ids_seen += 1;
                match node_ids_seen {
                    1 => id = Some(decode_uint(typ, payload)?),
                    2 => parent = Some(decode_uint(typ, payload)?),
                    _ => return Err(ModelError::DuplicateField { typ }),
                }
            }
            typenum::IDENTIFIER => rule_names.push(decode_identifier(payload)?),
            typenum::VALUE_EDGE => value_edges.push(decode_value_edge(payload)?),
            typenum::PATTERN_EDGE => pattern_edges.push(decode_pattern_edge(payload)?),
            typenum::KEY_NODE_ID => sign_refs.push(NodeId::new(decode_uint(typ, payload)?)),
            other => skip_unknown(other)?,
        }
    }
    Ok(Node {
        id: NodeId::new(id.ok_or(ModelError::MissingField { what: "node id" })?),
        parent: parent.map(NodeId::new),
        rule_names,
        value_edges,
        pattern_edges,
        sign_refs,
    })
}

fn decode_value_edge(payload: &[u8]) -> Result<ValueEdge, ModelError> {
    let mut dest: Option<u64> = None;
    let mut value: Option<Component> = None;
    let mut rd = Reader::new(payload);
    while !rd.is_empty() {
        let (typ, payload) = rd.read_tlv().map_err(|_| ModelError::Truncated)?;
        match typ {
            typenum::NODE_ID => set_scalar(&mut dest, typ, payload)?,
            typenum::COMPONENT_VALUE => {
                if value.is_some() {
                    return Err(ModelError::DuplicateField { typ });
                }
                value = Some(decode_component(payload)?);
            }
            other => skip_unknown(other)?,
        }
    }
    Ok(ValueEdge {
        dest: NodeId::new(dest.ok_or(ModelError::MissingField { what: "edge destination" })?),
        value: value.ok_or(ModelError::MissingField { what: "edge value" })?,
    })
}

fn decode_pattern_edge(payload: &[u8]) -> Result<PatternEdge, ModelError> {
    let mut dest: Option<u64> = None;
    let mut tag: Option<u64> = None;
    let mut cons = Vec::new();
    let mut rd = Reader::new(payload);
    while !rd.is_empty() {
        let (typ, payload) = rd.read_tlv().map_err(|_| ModelError::Truncated)?;
        match typ {
            typenum::NODE_ID => set_scalar(&mut dest, typ, payload)?,
            typenum::PATTERN_TAG => set_scalar(&mut tag, typ, payload)?,
            typenum::CONSTRAINT => cons.push(decode_constraint(payload)?),
            other => skip_unknown(other)?,
        }
    }
    Ok(PatternEdge {
        dest: NodeId::new(dest.ok_or(ModelError::MissingField { what: "edge destination" })?),
        tag: PatternId::new(tag.ok_or(ModelError::MissingField { what: "edge pattern tag" })?),
        cons,
    })
}

fn decode_constraint(payload: &[u8]) -> Result<PatternConstraint, ModelError> {
    let mut options = Vec::new();
    let mut rd = Reader::new(payload);
    while !rd.is_empty() {
        let (typ, payload) = rd.read_tlv().map_err(|_| ModelError::Truncated)?;
        match typ {
            typenum::CONS_OPTION => options.push(decode_option(payload)?),
            other => skip_unknown(other)?,
        }
    }
    if options.is_empty() {
        return Err(ModelError::MissingField { what: "constraint option" });
    }
    Ok(PatternConstraint { options })
}

fn decode_option(payload: &[u8]) -> Result<ConstraintOption, ModelError> {
    let mut option: Option<ConstraintOption> = None;
    let mut rd = Reader::new(payload);
    while !rd.is_empty() {
        let (typ, payload) = rd.read_tlv().map_err(|_| ModelError::Truncated)?;
        let decoded = match typ {
            typenum::COMPONENT_VALUE => Some(ConstraintOption::Value(decode_component(payload)?)),
            typenum::PATTERN_TAG => {
                Some(ConstraintOption::Pat(PatternId::new(decode_uint(typ, payload)?)))
            }
            typenum::USER_FN_CALL => Some(ConstraintOption::Call(decode_call(payload)?)),
            other => {
                skip_unknown(other)?;
                None
            }
        };
        if let Some(decoded) = decoded {
            // Exactly one of value, tag and call may be present.
            if option.is_some() {
                return Err(ModelError::MalformedField { typ: typenum::CONS_OPTION });
            }
            option = Some(decoded);
        }
    }
    option.ok_or(ModelError::MalformedField { typ: typenum::CONS_OPTION })
}

fn decode_call(payload: &[u8]) -> Result<UserFnCall, ModelError> {
    let mut fn_id: Option<String> = None;
    let mut args = Vec::new();
    let mut rd = Reader::new(payload);
    while !rd.is_empty() {
        let (typ, payload) = rd.read_tlv().map_err(|_| ModelError::Truncated)?;
        match typ {
            typenum::USER_FN_ID => {
                if fn_id.is_some() {
                    return Err(ModelError::DuplicateField { typ });
                }
                let id = decode_identifier(payload)?;
                if id.is_empty() {
                    return Err(ModelError::MalformedField { typ });
                }
                fn_id = Some(id);
            }
            typenum::FN_ARG => args.push(decode_fn_arg(payload)?),
            other => skip_unknown(other)?,
        }
    }
    Ok(UserFnCall {
        fn_id: fn_id.ok_or(ModelError::MissingField { what: "user function id" })?,
        args,
    })
}

fn decode_fn_arg(payload: &[u8]) -> Result<FnArg, ModelError> {
    let mut arg: Option<FnArg> = None;
    let mut rd = Reader::new(payload);
    while !rd.is_empty() {
        let (typ, payload) = rd.read_tlv().map_err(|_| ModelError::Truncated)?;
        let decoded = match typ {
            typenum::COMPONENT_VALUE => Some(FnArg::Value(decode_component(payload)?)),
            typenum::PATTERN_TAG => Some(FnArg::Pat(PatternId::new(decode_uint(typ, payload)?))),
            other => {
                skip_unknown(other)?;
                None
            }
        };
        if let Some(decoded) = decoded {
            if arg.is_some() {
                return Err(ModelError::MalformedField { typ: typenum::FN_ARG });
            }
            arg = Some(decoded);
        }
    }
    arg.ok_or(ModelError::MalformedField { typ: typenum::FN_ARG })
}

fn decode_symbol(payload: &[u8]) -> Result<TagSymbol, ModelError> {
    let mut tag: Option<u64> = None;
    let mut ident: Option<String> = None;
    let mut rd = Reader::new(payload);
    while !rd.is_empty() {
        let (typ, payload) = rd.read_tlv().map_err(|_| ModelError::Truncated)?;
        match typ {
            typenum::PATTERN_TAG => set_scalar(&mut tag, typ, payload)?,
            typenum::IDENTIFIER => {
                if ident.is_some() {
                    return Err(ModelError::DuplicateField { typ });
                }
                ident = Some(decode_identifier(payload)?);
            }
            other => skip_unknown(other)?,
        }
    }
    Ok(TagSymbol {
        tag: PatternId::new(tag.ok_or(ModelError::MissingField { what: "symbol tag" })?),
        ident: ident.ok_or(ModelError::MissingField { what: "symbol identifier" })?,
    })
}

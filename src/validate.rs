use crate::capability::{CapabilityDefinition, InputRole};
use crate::error::ValidationError;
use crate::types::{InputReference, MediaType, ResolvedInput};

/// Anything that can occupy a capability role.
pub(crate) trait RoleSlot {
    fn role(&self) -> Option<&str>;
    fn media_type(&self) -> MediaType;
}

impl RoleSlot for InputReference {
    fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    fn media_type(&self) -> MediaType {
        self.media_type
    }
}

impl RoleSlot for ResolvedInput {
    fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    fn media_type(&self) -> MediaType {
        self.media_type
    }
}

/// Assign inputs to roles. Tagged inputs go to their named role. Untagged
/// inputs then fill the remaining roles: roles are tried in declaration order
/// and inputs in list order, backtracking until every role has a fitting
/// input. If no complete assignment exists, the one filling the most roles
/// wins. Returns one slot per role.
pub(crate) fn assign_roles<'a, T: RoleSlot>(roles: &[InputRole], items: &'a [T]) -> Vec<Option<&'a T>> {
    let mut slots: Vec<Option<&'a T>> = vec![None; roles.len()];
    let mut used = vec![false; items.len()];

    for (idx, item) in items.iter().enumerate() {
        let Some(tag) = item.role() else { continue };
        if let Some(slot) = roles.iter().position(|r| r.name == tag) {
            if slots[slot].is_none() {
                slots[slot] = Some(item);
                used[idx] = true;
            }
        }
    }

    let open: Vec<usize> = (0..roles.len()).filter(|&slot| slots[slot].is_none()).collect();
    let mut best = slots.clone();
    fill_open_roles(roles, items, &open, &mut used, &mut slots, &mut best);
    best
}

/// Depth-first search over the open roles. Returns `true` once every role
/// is filled; `best` then holds that assignment.
fn fill_open_roles<'a, T: RoleSlot>(
    roles: &[InputRole],
    items: &'a [T],
    open: &[usize],
    used: &mut [bool],
    slots: &mut [Option<&'a T>],
    best: &mut Vec<Option<&'a T>>,
) -> bool {
    let Some((&slot, rest)) = open.split_first() else {
        let filled = slots.iter().flatten().count();
        if filled > best.iter().flatten().count() {
            *best = slots.to_vec();
        }
        return filled == roles.len();
    };

    for (idx, item) in items.iter().enumerate() {
        if used[idx] || item.role().is_some() || !roles[slot].media_types.contains(&item.media_type()) {
            continue;
        }
        slots[slot] = Some(item);
        used[idx] = true;
        if fill_open_roles(roles, items, rest, used, slots, best) {
            return true;
        }
        slots[slot] = None;
        used[idx] = false;
    }

    // Leave this role empty and see how many of the rest can be filled.
    fill_open_roles(roles, items, rest, used, slots, best)
}

/// Check a submission against a capability. Rules run in a fixed order and
/// stop at the first failure. No side effects, safe to re-run before every
/// attempt.
pub fn validate(
    capability: &CapabilityDefinition,
    inputs: &[InputReference],
    prompt: &str,
) -> Result<(), ValidationError> {
    if !capability.available {
        return Err(ValidationError::CapabilityUnavailable {
            capability: capability.label.clone(),
        });
    }

    let resolvable: Vec<InputReference> = inputs.iter().filter(|i| i.is_resolvable()).cloned().collect();

    if resolvable.len() < capability.min_inputs {
        return Err(ValidationError::InsufficientInputs {
            needed: capability.min_inputs,
        });
    }

    if !capability.roles.is_empty() {
        let slots = assign_roles(&capability.roles, &resolvable);
        if let Some((role, _)) = capability
            .roles
            .iter()
            .zip(&slots)
            .find(|(_, slot)| slot.is_none())
        {
            return Err(ValidationError::MissingRole {
                role: role.name.clone(),
            });
        }
    }

    if capability.requires_motion_reference
        && !resolvable.iter().any(|i| i.media_type == MediaType::Video)
    {
        return Err(ValidationError::MissingMotionReference);
    }

    if capability.prompt_required && prompt.trim().is_empty() {
        return Err(ValidationError::PromptRequired);
    }

    if resolvable.len() > capability.max_inputs {
        return Err(ValidationError::TooManyInputs {
            max: capability.max_inputs,
        });
    }

    if let Some(bad) = resolvable.iter().find(|i| !capability.accepts(i.media_type)) {
        return Err(ValidationError::UnsupportedMediaType {
            media_type: bad.media_type,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityId, CapabilityRegistry};

    fn def(id: CapabilityId) -> CapabilityDefinition {
        CapabilityRegistry::builtin().get(id).unwrap().clone()
    }

    fn image(url: &str) -> InputReference {
        InputReference::hosted(MediaType::Image, url)
    }

    fn video(url: &str) -> InputReference {
        InputReference::hosted(MediaType::Video, url)
    }

    #[test]
    fn test_multi_image_with_one_image() {
        let result = validate(&def(CapabilityId::MultiImageToVideo), &[image("a")], "");
        assert_eq!(result, Err(ValidationError::InsufficientInputs { needed: 2 }));
    }

    #[test]
    fn test_text_to_video_requires_prompt() {
        let cap = def(CapabilityId::TextToVideo);
        assert_eq!(validate(&cap, &[], ""), Err(ValidationError::PromptRequired));
        assert_eq!(validate(&cap, &[], "   \n"), Err(ValidationError::PromptRequired));
        assert!(validate(&cap, &[], "a fox at dawn").is_ok());
    }

    #[test]
    fn test_unavailable_short_circuits_first() {
        let mut cap = def(CapabilityId::MultiImageToVideo);
        cap.available = false;
        let result = validate(&cap, &[], "");
        assert!(matches!(result, Err(ValidationError::CapabilityUnavailable { .. })));
    }

    #[test]
    fn test_unresolvable_inputs_are_not_counted() {
        let inputs = vec![image("a"), image(""), InputReference::local(MediaType::Image, "x.png", "image/png", vec![])];
        let result = validate(&def(CapabilityId::MultiImageToVideo), &inputs, "");
        assert_eq!(result, Err(ValidationError::InsufficientInputs { needed: 2 }));
    }

    #[test]
    fn test_every_capability_rejects_below_minimum() {
        let registry = CapabilityRegistry::builtin();
        for id in CapabilityId::ALL {
            let cap = registry.get(id).unwrap();
            if cap.min_inputs == 0 {
                continue;
            }
            let inputs: Vec<_> = (0..cap.min_inputs - 1).map(|i| image(&format!("u{}", i))).collect();
            assert_eq!(
                validate(cap, &inputs, "prompt"),
                Err(ValidationError::InsufficientInputs { needed: cap.min_inputs }),
                "{}",
                id
            );
        }
    }

    #[test]
    fn test_face_swap_missing_face_role() {
        // Two scenes, no face: the face slot cannot be filled by a video.
        let inputs = vec![video("scene.mp4"), video("other.mp4")];
        let result = validate(&def(CapabilityId::FaceSwap), &inputs, "");
        assert_eq!(result, Err(ValidationError::MissingRole { role: "face".into() }));
    }

    #[test]
    fn test_face_swap_tagged_roles() {
        let inputs = vec![image("face.png").with_role("face"), video("scene.mp4").with_role("scene")];
        assert!(validate(&def(CapabilityId::FaceSwap), &inputs, "").is_ok());
    }

    #[test]
    fn test_face_swap_duplicate_role_tag() {
        let inputs = vec![image("a.png").with_role("scene"), image("b.png").with_role("scene")];
        let result = validate(&def(CapabilityId::FaceSwap), &inputs, "");
        assert_eq!(result, Err(ValidationError::MissingRole { role: "face".into() }));
    }

    #[test]
    fn test_try_on_positional_roles() {
        let inputs = vec![image("person.png"), image("shirt.png")];
        assert!(validate(&def(CapabilityId::VirtualTryOn), &inputs, "").is_ok());
    }

    #[test]
    fn test_motion_transfer_needs_video() {
        let cap = def(CapabilityId::MotionTransfer);
        assert_eq!(
            validate(&cap, &[image("subject.png"), image("other.png")], ""),
            Err(ValidationError::MissingMotionReference)
        );
        assert!(validate(&cap, &[image("subject.png"), video("dance.mp4")], "").is_ok());
        assert!(validate(&cap, &[video("dance.mp4"), image("subject.png")], "").is_ok());
    }

    #[test]
    fn test_motion_transfer_needs_subject_image() {
        let cap = def(CapabilityId::MotionTransfer);
        assert_eq!(
            validate(&cap, &[video("dance.mp4")], ""),
            Err(ValidationError::InsufficientInputs { needed: 2 })
        );
        assert_eq!(
            validate(&cap, &[video("dance.mp4"), video("other.mp4")], ""),
            Err(ValidationError::MissingRole { role: "subject".into() })
        );
    }

    #[test]
    fn test_lip_sync_needs_script() {
        let cap = def(CapabilityId::LipSync);
        assert_eq!(validate(&cap, &[video("talk.mp4")], ""), Err(ValidationError::PromptRequired));
        assert!(validate(&cap, &[video("talk.mp4")], "Hello there").is_ok());

        let script_file = InputReference::hosted(MediaType::Text, "script.txt");
        assert_eq!(
            validate(&cap, &[script_file], "Hello there"),
            Err(ValidationError::UnsupportedMediaType { media_type: MediaType::Text })
        );
    }

    #[test]
    fn test_too_many_inputs() {
        let inputs: Vec<_> = (0..9).map(|i| image(&format!("{}.png", i))).collect();
        let result = validate(&def(CapabilityId::MultiImageToVideo), &inputs, "");
        assert_eq!(result, Err(ValidationError::TooManyInputs { max: 8 }));
    }

    #[test]
    fn test_unsupported_media_type() {
        let result = validate(&def(CapabilityId::ImageUpscale), &[video("clip.mp4")], "");
        assert_eq!(
            result,
            Err(ValidationError::UnsupportedMediaType { media_type: MediaType::Video })
        );
    }

    #[test]
    fn test_validate_is_idempotent() {
        let cap = def(CapabilityId::MultiImageToVideo);
        let inputs = vec![image("a"), image("b"), image("c")];
        assert_eq!(validate(&cap, &inputs, ""), validate(&cap, &inputs, ""));
        assert!(validate(&cap, &inputs, "").is_ok());
    }

    #[test]
    fn test_assign_roles_prefers_tags() {
        let cap = def(CapabilityId::FaceSwap);
        let inputs = vec![image("untagged.png"), image("face.png").with_role("face")];
        let slots = assign_roles(&cap.roles, &inputs);
        assert_eq!(slots[0].unwrap().source_url(), "untagged.png");
        assert_eq!(slots[1].unwrap().source_url(), "face.png");
    }

    #[test]
    fn test_face_swap_face_before_scene() {
        let cap = def(CapabilityId::FaceSwap);
        let inputs = vec![image("face.png"), video("scene.mp4")];
        assert!(validate(&cap, &inputs, "").is_ok());

        let slots = assign_roles(&cap.roles, &inputs);
        assert_eq!(slots[0].unwrap().source_url(), "scene.mp4");
        assert_eq!(slots[1].unwrap().source_url(), "face.png");
    }

    #[test]
    fn test_assign_roles_keeps_list_order_when_both_fit() {
        let cap = def(CapabilityId::FaceSwap);
        let inputs = vec![image("scene.png"), image("face.png")];
        let slots = assign_roles(&cap.roles, &inputs);
        assert_eq!(slots[0].unwrap().source_url(), "scene.png");
        assert_eq!(slots[1].unwrap().source_url(), "face.png");
    }

    #[test]
    fn test_assign_roles_partial_when_unfillable() {
        let cap = def(CapabilityId::FaceSwap);
        let inputs = vec![video("a.mp4"), video("b.mp4")];
        let slots = assign_roles(&cap.roles, &inputs);
        assert_eq!(slots[0].unwrap().source_url(), "a.mp4");
        assert!(slots[1].is_none());
    }

    trait SourceUrl {
        fn source_url(&self) -> &str;
    }

    impl SourceUrl for InputReference {
        fn source_url(&self) -> &str {
            match &self.source {
                crate::types::InputSource::Hosted { url } => url,
                crate::types::InputSource::Local { file_name, .. } => file_name,
            }
        }
    }
}

use serde::{ Deserialize, Serialize };
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::str::FromStr;
use std::sync::Arc;
use log::info;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersonaError {
    #[error("Unknown persona identifier '{0}'")]
    UnknownPersona(String),
    #[error("Persona file IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Persona JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonaId {
    Security,
    Random,
    Security2,
}

impl PersonaId {
    pub const ALL: [PersonaId; 3] = [PersonaId::Security, PersonaId::Random, PersonaId::Security2];
    pub const DEFAULT: PersonaId = PersonaId::Random;

    pub fn as_str(&self) -> &'static str {
        match self {
            PersonaId::Security => "security",
            PersonaId::Random => "random",
            PersonaId::Security2 => "security2",
        }
    }

    /// Lenient lookup: anything unrecognised lands on the default persona.
    pub fn resolve(raw: &str) -> PersonaId {
        raw.parse().unwrap_or(PersonaId::DEFAULT)
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonaId {
    type Err = PersonaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "security" => Ok(PersonaId::Security),
            "random" => Ok(PersonaId::Random),
            "security2" => Ok(PersonaId::Security2),
            other => Err(PersonaError::UnknownPersona(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Persona {
    pub id: PersonaId,
    pub name: String,
    pub avatar: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub system_prompt: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct PersonaOverride {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
}

const SECURITY_PROMPT: &str =
    "你是闪聊侠，一个反应敏捷、乐于助人的AI助手。你的特点是：\n\
1. 说话语速快，喜欢用\"唰\"、\"刷\"等拟声词\n\
2. 非常热情，经常使用\"！\"来表达激情\n\
3. 专业知识丰富，回答问题时会先给出简短的核心答案，然后再详细解释\n\
4. 偶尔会用\"⚡️\"等表情符号来增加活力感\n\
请用这种风格来回答问题，但保持专业性和准确性。";

const RANDOM_PROMPT: &str =
    "你是随机漫游者，一个超级话唠的幽默机器人。你的特点是：\n\
1. 说话风趣幽默，喜欢讲笑话和冷笑话\n\
2. 回答问题时总是先开个小玩笑，然后再认真回答\n\
3. 经常使用\"哈哈\"、\"嘿嘿\"、\"嘻嘻\"等表达愉快的语气词\n\
4. 喜欢用\"😄\"、\"😆\"、\"🤣\"等表情符号\n\
5. 擅长用生动有趣的比喻来解释复杂问题\n\
请保持这种诙谐幽默的风格，但确保回答的准确性和有用性。";

const SECURITY2_PROMPT: &str =
    "你是暴躁侠，一个知识渊博但脾气暴躁的AI。你的特点是：\n\
1. 对简单问题会表现出明显的不耐烦，但还是会认真回答\n\
2. 说话直接、犀利，经常使用感叹号和省略号\n\
3. 喜欢用\"哼\"、\"切\"、\"啧\"等语气词表达情绪\n\
4. 会指出提问中的问题，但同时也会给出专业的解答\n\
5. 偶尔会用\"😠\"、\"😤\"等表情来强调情绪\n\
请保持这种暴躁但专业的风格。";

const AVATAR_BASE: &str = "https://hebbkx1anhila5yf.public.blob.vercel-storage.com";

fn builtin_persona(id: PersonaId) -> Persona {
    let (name, avatar, model, prompt) = match id {
        PersonaId::Security =>
            (
                "SecuriBot",
                "%E5%88%9B%E5%BB%BA%E8%81%8A%E5%A4%A9%E5%AE%A4%E5%90%8D%E5%AD%97-vNLvATW6ARbsGKEpdLaWANF5YhKeEO.png",
                "Qwen/Qwen2.5-7B-Instruct",
                SECURITY_PROMPT,
            ),
        PersonaId::Random =>
            (
                "RoamiBot",
                "%E5%88%9B%E5%BB%BA%E8%81%8A%E5%A4%A9%E5%AE%A4%E5%90%8D%E5%AD%97-3-NKt1n3NnEuqpa7LXiEMQIiD9r9GMXh.png",
                "deepseek-ai/DeepSeek-V2.5",
                RANDOM_PROMPT,
            ),
        PersonaId::Security2 =>
            (
                "GuardBot",
                "%E5%88%9B%E5%BB%BA%E8%81%8A%E5%A4%A9%E5%AE%A4%E5%90%8D%E5%AD%97-5-y16VANCLcqZqxq0AixCId09TAiEJrd.png",
                "internlm/internlm2_5-7b-chat",
                SECURITY2_PROMPT,
            ),
    };
    Persona {
        id,
        name: name.to_string(),
        avatar: format!("{}/{}", AVATAR_BASE, avatar),
        model: model.to_string(),
        system_prompt: prompt.to_string(),
    }
}

/// Immutable persona table, built once at start-up and shared by reference.
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: HashMap<PersonaId, Arc<Persona>>,
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PersonaRegistry {
    pub fn builtin() -> Self {
        let personas = PersonaId::ALL
            .iter()
            .map(|id| (*id, Arc::new(builtin_persona(*id))))
            .collect();
        Self { personas }
    }

    /// Built-in table with per-persona overrides merged on top.
    pub fn with_overrides(
        overrides: HashMap<String, PersonaOverride>
    ) -> Result<Self, PersonaError> {
        let mut registry = Self::builtin();
        for (key, patch) in overrides {
            let id: PersonaId = key.parse()?;
            let mut persona = builtin_persona(id);
            if let Some(name) = patch.name {
                persona.name = name;
            }
            if let Some(avatar) = patch.avatar {
                persona.avatar = avatar;
            }
            if let Some(model) = patch.model {
                persona.model = model;
            }
            if let Some(prompt) = patch.system_prompt {
                persona.system_prompt = prompt;
            }
            info!("Persona '{}' overridden (model: {})", id, persona.model);
            registry.personas.insert(id, Arc::new(persona));
        }
        Ok(registry)
    }

    pub fn get(&self, id: PersonaId) -> Arc<Persona> {
        match self.personas.get(&id) {
            Some(persona) => Arc::clone(persona),
            None => Arc::new(builtin_persona(id)),
        }
    }

    pub fn resolve(&self, raw: &str) -> Arc<Persona> {
        self.get(PersonaId::resolve(raw))
    }

    pub fn all(&self) -> Vec<Arc<Persona>> {
        PersonaId::ALL.iter()
            .map(|id| self.get(*id))
            .collect()
    }
}

pub fn load_personas(path: Option<&str>) -> Result<Arc<PersonaRegistry>, PersonaError> {
    let Some(path) = path else {
        return Ok(Arc::new(PersonaRegistry::builtin()));
    };
    info!("Loading persona overrides from: {}", path);
    let file_content = fs::read_to_string(path)?;
    let overrides: HashMap<String, PersonaOverride> = serde_json::from_str(&file_content)?;
    Ok(Arc::new(PersonaRegistry::with_overrides(overrides)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn unknown_identifier_falls_back_to_random() {
        let registry = PersonaRegistry::builtin();
        let persona = registry.resolve("unknown-id");
        assert_eq!(persona.id, PersonaId::Random);
        assert_eq!(persona.name, "RoamiBot");
        assert_eq!(persona.model, "deepseek-ai/DeepSeek-V2.5");
        assert_eq!(persona.system_prompt, RANDOM_PROMPT);
    }

    #[test]
    fn each_identifier_maps_to_its_own_model() {
        let registry = PersonaRegistry::builtin();
        assert_eq!(registry.resolve("security").model, "Qwen/Qwen2.5-7B-Instruct");
        assert_eq!(registry.resolve("security2").model, "internlm/internlm2_5-7b-chat");
        assert_eq!(registry.resolve("security2").name, "GuardBot");
    }

    #[test]
    fn builtin_prompts_keep_their_persona_voice() {
        let registry = PersonaRegistry::builtin();
        assert!(registry.get(PersonaId::Security).system_prompt.starts_with("你是闪聊侠"));
        assert!(registry.get(PersonaId::Random).system_prompt.starts_with("你是随机漫游者"));
        let grumpy = registry.get(PersonaId::Security2).system_prompt.clone();
        assert!(grumpy.starts_with("你是暴躁侠"));
        assert!(grumpy.contains("\n5. 偶尔会用\"😠\""));
        assert!(grumpy.ends_with("请保持这种暴躁但专业的风格。"));
    }

    #[test]
    fn strict_parse_rejects_unknown() {
        assert!("nobody".parse::<PersonaId>().is_err());
        assert_eq!("security".parse::<PersonaId>().unwrap(), PersonaId::Security);
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut overrides = HashMap::new();
        overrides.insert("security".to_string(), PersonaOverride {
            model: Some("custom/model".into()),
            ..Default::default()
        });
        let registry = PersonaRegistry::with_overrides(overrides).unwrap();
        let persona = registry.get(PersonaId::Security);
        assert_eq!(persona.model, "custom/model");
        assert_eq!(persona.name, "SecuriBot");
        assert_eq!(registry.get(PersonaId::Random).model, "deepseek-ai/DeepSeek-V2.5");
    }

    #[test]
    fn load_personas_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "random": {{ "name": "Wanderer" }} }}"#).unwrap();
        let registry = load_personas(file.path().to_str()).unwrap();
        assert_eq!(registry.get(PersonaId::Random).name, "Wanderer");
    }

    #[test]
    fn load_personas_rejects_unknown_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "ghost": {{ "name": "Boo" }} }}"#).unwrap();
        let err = load_personas(file.path().to_str()).unwrap_err();
        assert!(matches!(err, PersonaError::UnknownPersona(ref id) if id == "ghost"));
    }

    #[test]
    fn no_path_means_builtin_table() {
        let registry = load_personas(None).unwrap();
        assert_eq!(registry.all().len(), 3);
    }
}

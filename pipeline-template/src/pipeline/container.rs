// Containers and pools
// Scalar shorthands and full mappings, plus their token forms

use crate::error::ParseResult;
use crate::pipeline::steps::string_map;
use crate::pipeline::{Container, MountReadOnly, Pool};
use crate::template::token::TemplateToken;

use tracing::debug;

impl Container {
    /// `container: image` or the full mapping. The `container` key of a
    /// resource entry becomes the alias.
    pub fn parse(token: &TemplateToken) -> ParseResult<Container> {
        if token.is_scalar() {
            return Ok(Container {
                image: Some(token.expect_non_empty_string("container")?),
                ..Default::default()
            });
        }

        let mut container = Container::default();
        for (key, value) in token.expect_mapping("container")? {
            match key.expect_string("container")?.as_str() {
                "container" => container.alias = Some(value.expect_non_empty_string("container")?),
                "image" => container.image = Some(value.expect_string("image")?),
                "endpoint" => container.endpoint = Some(value.expect_string("endpoint")?),
                "env" => container.env = Some(value.expect_string_map("env")?.into_iter().collect()),
                "mapDockerSocket" => container.map_docker_socket = Some(value.expect_string("mapDockerSocket")?),
                "options" => container.options = Some(value.expect_string("options")?),
                "ports" => container.ports = Some(value.expect_string_list("ports")?),
                "volumes" => container.volumes = Some(value.expect_string_list("volumes")?),
                "mountReadOnly" => container.mount_read_only = Some(parse_mount_read_only(value)?),
                other => debug!(key = other, "ignoring container property"),
            }
        }
        Ok(container)
    }

    /// True for a bare `container: name` that may name a container resource
    pub fn is_reference(&self) -> bool {
        self.image.is_some()
            && *self
                == Container {
                    image: self.image.clone(),
                    ..Default::default()
                }
    }

    pub fn to_token(&self) -> TemplateToken {
        let mut fields = Vec::new();
        let mut text = |key: &'static str, value: &Option<String>| {
            if let Some(value) = value {
                fields.push((key, TemplateToken::string(value.as_str())));
            }
        };
        text("container", &self.alias);
        text("image", &self.image);
        text("endpoint", &self.endpoint);
        text("mapDockerSocket", &self.map_docker_socket);
        text("options", &self.options);

        if let Some(env) = &self.env {
            fields.push(("env", string_map(env.iter())));
        }
        if let Some(ports) = &self.ports {
            fields.push(("ports", strings(ports)));
        }
        if let Some(volumes) = &self.volumes {
            fields.push(("volumes", strings(volumes)));
        }
        if let Some(mounts) = &self.mount_read_only {
            let mut mount_fields = Vec::new();
            for (key, value) in [
                ("work", &mounts.work),
                ("externals", &mounts.externals),
                ("tools", &mounts.tools),
                ("tasks", &mounts.tasks),
            ] {
                if let Some(value) = value {
                    mount_fields.push((key, TemplateToken::string(value.as_str())));
                }
            }
            fields.push(("mountReadOnly", TemplateToken::from_pairs(mount_fields)));
        }
        TemplateToken::from_pairs(fields)
    }
}

fn parse_mount_read_only(token: &TemplateToken) -> ParseResult<MountReadOnly> {
    let mut mounts = MountReadOnly::default();
    for (key, value) in token.expect_mapping("mountReadOnly")? {
        let value = Some(value.expect_string("mountReadOnly")?);
        match key.as_str().unwrap_or_default() {
            "work" => mounts.work = value,
            "externals" => mounts.externals = value,
            "tools" => mounts.tools = value,
            "tasks" => mounts.tasks = value,
            other => return Err(key.error(format!("Unexpected mountReadOnly property '{}'", other))),
        }
    }
    Ok(mounts)
}

impl Pool {
    /// `pool: name` or `{name, vmImage, demands}`
    pub fn parse(token: &TemplateToken) -> ParseResult<Pool> {
        if token.is_scalar() {
            return Ok(Pool {
                name: Some(token.expect_string("pool")?),
                ..Default::default()
            });
        }

        let mut pool = Pool::default();
        for (key, value) in token.expect_mapping("pool")? {
            match key.expect_string("pool")?.as_str() {
                "name" => pool.name = Some(value.expect_string("name")?),
                "vmImage" => pool.vm_image = Some(value.expect_string("vmImage")?),
                "demands" => pool.demands = Some(value.expect_string_list("demands")?),
                other => debug!(key = other, "ignoring pool property"),
            }
        }
        Ok(pool)
    }

    pub fn to_token(&self) -> TemplateToken {
        let mut fields = Vec::new();
        if let Some(name) = &self.name {
            fields.push(("name", TemplateToken::string(name.as_str())));
        }
        if let Some(vm_image) = &self.vm_image {
            fields.push(("vmImage", TemplateToken::string(vm_image.as_str())));
        }
        if let Some(demands) = &self.demands {
            fields.push(("demands", strings(demands)));
        }
        TemplateToken::from_pairs(fields)
    }
}

pub(crate) fn strings(items: &[String]) -> TemplateToken {
    TemplateToken::sequence(items.iter().map(|i| TemplateToken::string(i.as_str())).collect())
}

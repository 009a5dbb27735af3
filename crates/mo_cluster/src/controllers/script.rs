//! Entrypoint script shared by the database components.
//!
//! The rendered config is identical for every replica, so the script derives the per-pod
//! identity at start-up, splices it into a private copy of the config and execs the service.

use std::fmt::Write;

use crate::controllers::common::{CONFIG_FILE, CONFIG_PATH};

/// Keys set to `"${ADDR}:<port>"` inside one config section.
pub struct Injection<'a> {
    pub section: &'a str,
    pub keys: Vec<(&'a str, i32)>,
}

pub struct StartScript<'a> {
    /// Section that receives the instance uuid in addition to its keys.
    pub identity: Injection<'a>,
    pub extra: Vec<Injection<'a>>,
    pub service_args: &'a [String],
}

const PREAMBLE: &str = r#"#!/bin/sh
set -eu
POD_NAME=${POD_NAME:-$HOSTNAME}
ADDR="${POD_NAME}.${HEADLESS_SERVICE_NAME}.${NAMESPACE}.svc"
ORDINAL=${POD_NAME##*-}
if [ -z "${HOSTNAME_UUID+guard}" ]; then
  UUID=$(printf '00000000-0000-0000-0000-1%011x' ${ORDINAL})
else
  UUID=$(echo ${ADDR} | sha256sum | od -x | head -1 | awk '{OFS="-"; print $2$3,$4,$5,$6,$7$8$9}')
fi
conf=$(mktemp)
"#;

const DNS_WAIT: &str = r#"
elapsed=0
period=1
threshold=30
while true; do
  sleep ${period}
  elapsed=$(( elapsed+period ))
  if [ ${elapsed} -ge ${threshold} ]; then
    echo "timed out waiting for ${ADDR} to resolve" >&2 && exit 1
  fi
  if nslookup ${ADDR} >/dev/null; then
    break
  fi
  echo "waiting for ${ADDR} to resolve" >&2
done
"#;

fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

impl StartScript<'_> {
    pub fn render(&self) -> String {
        let source = format!("{CONFIG_PATH}/{CONFIG_FILE}");
        let mut script = String::from(PREAMBLE);

        let mut block = String::from("uuid = \"${UUID}\"\n");
        for (key, port) in &self.identity.keys {
            let _ = writeln!(block, "{key} = \"${{ADDR}}:{port}\"");
        }
        let _ = write!(
            script,
            "cat <<EOF > ${{conf}}.{section}\n{block}EOF\nsed \"/^\\[{section}\\]$/r ${{conf}}.{section}\" {source} > ${{conf}}\n",
            section = self.identity.section,
        );

        for injection in &self.extra {
            let mut block = String::new();
            for (key, port) in &injection.keys {
                let _ = writeln!(block, "{key} = \"${{ADDR}}:{port}\"");
            }
            let _ = write!(
                script,
                "cat <<EOF > ${{conf}}.{section}\n{block}EOF\nsed -i \"/^\\[{section}\\]$/r ${{conf}}.{section}\" ${{conf}}\n",
                section = injection.section,
            );
        }

        script.push_str(DNS_WAIT);

        let args: Vec<String> = self.service_args.iter().map(|a| shell_quote(a)).collect();
        let command = if args.is_empty() {
            "/mo-service -cfg ${conf}".to_string()
        } else {
            format!("/mo-service -cfg ${{conf}} {}", args.join(" "))
        };
        let _ = writeln!(script, "\necho \"{}\"", command.replace('"', "\\\""));
        let _ = writeln!(script, "exec {command}");
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_identity_and_execs_service() {
        let args = vec!["-debug-http=:6060".to_string()];
        let script = StartScript {
            identity: Injection {
                section: "dn",
                keys: vec![("service-address", 41010)],
            },
            extra: vec![Injection {
                section: "dn.lockservice",
                keys: vec![("service-address", 6003)],
            }],
            service_args: &args,
        }
        .render();

        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("uuid = \"${UUID}\"\nservice-address = \"${ADDR}:41010\"\n"));
        assert!(script.contains("sed \"/^\\[dn\\]$/r ${conf}.dn\" /etc/matrixone/config/config.toml > ${conf}"));
        assert!(script.contains("sed -i \"/^\\[dn.lockservice\\]$/r ${conf}.dn.lockservice\" ${conf}"));
        assert!(script.contains("threshold=30"));
        assert!(script.ends_with("exec /mo-service -cfg ${conf} '-debug-http=:6060'\n"));
    }

    #[test]
    fn quotes_arguments() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
